//! Tailfed issuer HTTP entrypoint.
//!
//! Launches an axum-based server exposing the token issuance protocol:
//!
//! - `POST /start` – begin a challenge flow for a node
//! - `POST /finalize` – exchange a verified flow for an identity token
//! - `GET /config.json` – daemon configuration document
//! - `GET /.well-known/openid-configuration` – OIDC discovery document
//! - `GET /.well-known/jwks.json` – published signing keys
//! - `GET /version.json`, `GET /health` – operational endpoints

mod config;
mod run;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run::run().await
}
