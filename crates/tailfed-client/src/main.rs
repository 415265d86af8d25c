//! The `tailfed` daemon binary.
//!
//! Periodically refreshes a web identity token issued by a Tailfed server,
//! proving this node's membership in the tailnet. SIGHUP forces an
//! immediate refresh; SIGINT/SIGTERM shut down gracefully.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tailfed_client::daemon::{self, DaemonConfig};
use tailfed_types::GoDuration;
use tailfed_types::version::BuildInfo;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "tailfed", version, about = "A daemon for refreshing web identity tokens via Tailfed")]
struct Cli {
    /// The minimum level to log at
    #[arg(long, short = 'l', env = "TAILFED_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// The URL of the Tailfed API
    #[arg(long, short = 'u', env = "TAILFED_URL")]
    url: Option<Url>,

    /// The path to write the generated web identity token to
    #[arg(long, short = 'p', env = "TAILFED_PATH", default_value = "/run/tailfed/token")]
    path: PathBuf,

    /// Where to record the daemon's process id
    #[arg(long, env = "TAILFED_PID_FILE")]
    pid_file: Option<PathBuf>,

    /// Fallback refresh cadence if the server does not advertise one
    #[arg(long, short = 'f', env = "TAILFED_FREQUENCY")]
    frequency: Option<GoDuration>,

    /// Base URL of the local overlay daemon's status API
    #[arg(long, env = "TAILFED_LOCAL_API", default_value = "http://127.0.0.1:41112/")]
    local_api: Url,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print build information and exit
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(Commands::Version) = cli.command {
        let info = BuildInfo::capture(env!("CARGO_PKG_VERSION"));
        match serde_json::to_string_pretty(&info) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                tracing::error!(error = %err, "failed to render build info");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let Some(url) = cli.url else {
        tracing::error!("--url is required to start the daemon");
        return ExitCode::FAILURE;
    };

    let config = DaemonConfig {
        url,
        token_path: cli.path,
        pid_file: cli.pid_file,
        frequency: cli.frequency.map(|frequency| frequency.as_duration()),
        local_api: cli.local_api,
    };

    match daemon::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "daemon failed");
            ExitCode::FAILURE
        }
    }
}
