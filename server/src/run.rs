//! Issuer server wiring.
//!
//! Builds the configured backends, runs the metadata generator, and serves
//! the issuer's HTTP surface until a shutdown signal arrives. This is the
//! single-process deployment: every stage handler runs in one binary
//! against shared in-process or filesystem state.

use axum::http::Method;
use dotenvy::dotenv;
use std::sync::Arc;
use tailfed_issuer::control::{Authentication, ControlPlane, HostedControlPlane, TlsMode};
use tailfed_issuer::finalizer::Finalizer;
use tailfed_issuer::generator::Generator;
use tailfed_issuer::handlers::{self, AppState};
use tailfed_issuer::initializer::Initializer;
use tailfed_issuer::launcher::LocalLauncher;
use tailfed_issuer::metadata::{FilesystemMetadata, MemoryMetadata, MetadataStore};
use tailfed_issuer::signing::MemorySigner;
use tailfed_issuer::storage::{FilesystemStore, FlowStore, MemoryStore};
use tailfed_issuer::util::SigDown;
use tailfed_issuer::verifier::Verifier;
use tailfed_types::proto::GenerateRequest;
use tailfed_types::version::BuildInfo;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, StoreBackend};

/// Initializes and runs the issuer server.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = Config::load()?;

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store: Arc<dyn FlowStore> = match config.storage.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Filesystem => Arc::new(FilesystemStore::open(&config.storage.path)?),
    };
    let metadata: Arc<dyn MetadataStore> = match config.metadata.backend {
        StoreBackend::Memory => Arc::new(MemoryMetadata::new()),
        StoreBackend::Filesystem => Arc::new(FilesystemMetadata::open(&config.metadata.path)?),
    };

    let signer = Arc::new(MemorySigner::generate()?);
    tracing::debug!(kid = %signer.kid(), "generated ephemeral signing key");

    let auth = match (&config.tailscale.api_key, &config.tailscale.oauth) {
        (Some(key), _) => Authentication::ApiKey(key.reveal().to_owned()),
        (None, Some(oauth)) => Authentication::OAuth {
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.reveal().to_owned(),
        },
        (None, None) => unreachable!("validated at config load"),
    };
    let tls_mode = match config.tailscale.tls_mode {
        crate::config::TlsModeConfig::Strict => TlsMode::Strict,
        crate::config::TlsModeConfig::Insecure => TlsMode::Insecure,
    };
    let control: Arc<dyn ControlPlane> = Arc::new(HostedControlPlane::with_tls_mode(
        config.control_base_url(),
        config.tailscale.tailnet.clone(),
        auth,
        tls_mode,
    )?);

    let verifier = Arc::new(Verifier::new(store.clone()));
    let (launcher, _dispatcher) = LocalLauncher::spawn(verifier, store.clone());

    let validity = config.signing.validity.as_duration();
    let generator = Generator::new(metadata.clone(), signer.clone(), validity);
    generator
        .generate(&GenerateRequest {
            issuer: config.issuer.clone(),
        })
        .await?;

    let state = AppState {
        initializer: Initializer::new(control, store.clone(), Arc::new(launcher)),
        finalizer: Finalizer::new(store, signer, config.signing.audience.clone(), validity),
        metadata,
        issuer: config.issuer.clone(),
        build: BuildInfo::capture(env!("CARGO_PKG_VERSION")),
    };

    let app = handlers::routes(Arc::new(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    tracing::info!(address = %config.address, "starting server");
    let listener = tokio::net::TcpListener::bind(config.address).await?;

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
