//! Configuration for the issuer server.
//!
//! Configuration comes from a JSON file, overlaid with environment
//! variables: with the default prefix, `TAILFED_TAILSCALE__API_KEY`
//! overrides `tailscale.api-key` (`__` separates nesting, `_` maps to `-`).
//! String values may be literals, `$VAR`/`${VAR}` environment references,
//! or `file://` paths read from disk.

use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::path::PathBuf;
use tailfed_types::GoDuration;

/// CLI arguments for the issuer server.
#[derive(Parser, Debug)]
#[command(name = "tailfed-server")]
#[command(version, about = "Tailfed issuer HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Prefix of environment variable overrides
    #[arg(long, env = "CONFIG_ENV_PREFIX", default_value = "TAILFED_")]
    env_prefix: String,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The address and port combination to listen on.
    #[serde(default = "config_defaults::address")]
    pub address: SocketAddr,
    /// The minimum level to log at.
    #[serde(default = "config_defaults::log_level")]
    pub log_level: String,
    /// The public base URL tokens and metadata are issued under.
    pub issuer: String,

    pub signing: SigningConfig,
    pub tailscale: TailscaleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
}

/// Token issuance parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SigningConfig {
    /// The audience claim of issued tokens.
    pub audience: String,
    /// How long issued tokens stay valid.
    #[serde(default = "config_defaults::validity")]
    pub validity: GoDuration,
    /// Reference to an external signing key. Requires a remote signing
    /// deployment; this single-process server only supports the ephemeral
    /// in-memory key.
    #[serde(default)]
    pub key: Option<Secret>,
}

/// Control-plane access.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TailscaleConfig {
    /// The name of the tailnet to issue tokens for.
    pub tailnet: String,
    /// Which control plane to talk to.
    #[serde(default)]
    pub backend: TailscaleBackend,
    /// Base URL override; required for the headscale backend.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Certificate validation policy for self-hosted control planes.
    #[serde(default)]
    pub tls_mode: TlsModeConfig,
    /// API key authentication.
    #[serde(default)]
    pub api_key: Option<Secret>,
    /// OAuth client-credentials authentication.
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailscaleBackend {
    #[default]
    Hosted,
    Headscale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsModeConfig {
    #[default]
    Strict,
    Insecure,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret,
}

/// Flow storage selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory used by the filesystem backend.
    #[serde(default = "config_defaults::storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: config_defaults::storage_path(),
        }
    }
}

/// Metadata storage selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory used by the filesystem backend.
    #[serde(default = "config_defaults::metadata_path")]
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: config_defaults::metadata_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Filesystem,
}

/// Verification dispatch selection. Only the in-process backend exists in
/// this server; the field is validated so a misdirected production config
/// fails loudly instead of silently running without durable retries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LauncherConfig {
    #[serde(default = "config_defaults::launcher_backend")]
    pub backend: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            backend: config_defaults::launcher_backend(),
        }
    }
}

mod config_defaults {
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::time::Duration;
    use tailfed_types::GoDuration;

    pub fn address() -> SocketAddr {
        "127.0.0.1:8000".parse().expect("static address parses")
    }

    pub fn log_level() -> String {
        "info".to_owned()
    }

    pub fn validity() -> GoDuration {
        GoDuration(Duration::from_secs(3600))
    }

    pub fn storage_path() -> PathBuf {
        PathBuf::from("flows")
    }

    pub fn metadata_path() -> PathBuf {
        PathBuf::from("metadata")
    }

    pub fn launcher_backend() -> String {
        "local".to_owned()
    }
}

/// A string value that resolves indirections during deserialization.
///
/// Supports literals, `$VAR`/`${VAR}` environment references, and
/// `file://path` references read from disk. The resolved value never
/// appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// The resolved value.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    fn resolve(raw: &str) -> Result<String, String> {
        if let Some(path) = raw.strip_prefix("file://") {
            return std::fs::read_to_string(path)
                .map(|contents| contents.trim_end_matches('\n').to_owned())
                .map_err(|err| format!("failed to read {path:?}: {err}"));
        }

        if let Some(name) = parse_env_reference(raw) {
            return std::env::var(&name)
                .map_err(|_| format!("environment variable {name:?} not found"));
        }

        Ok(raw.to_owned())
    }
}

/// Returns the variable name if `raw` matches `$VAR` or `${VAR}` syntax.
fn parse_env_reference(raw: &str) -> Option<String> {
    if let Some(inner) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        return Some(inner.to_owned());
    }
    let name = raw.strip_prefix('$')?;
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Some(name.to_owned())
    } else {
        None
    }
}

impl Deref for Secret {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(redacted)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Secret::resolve(&raw)
            .map(Secret)
            .map_err(serde::de::Error::custom)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Loads configuration from CLI arguments, the JSON file, and the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::load_from(cli.config.as_deref(), &cli.env_prefix)
    }

    /// Loads configuration from an optional file path plus environment
    /// overrides with the given prefix.
    pub fn load_from(
        path: Option<&std::path::Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let mut value = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|err| ConfigError::FileRead(path.to_owned(), err))?;
                serde_json::from_str(&contents)?
            }
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        apply_env_overrides(&mut value, env_prefix, std::env::vars());

        let config: Config = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tailscale.api_key.is_none() && self.tailscale.oauth.is_none() {
            return Err(ConfigError::Invalid(
                "tailscale requires either api-key or oauth credentials".to_owned(),
            ));
        }
        if self.tailscale.backend == TailscaleBackend::Headscale
            && self.tailscale.base_url.is_none()
        {
            return Err(ConfigError::Invalid(
                "headscale backend requires base-url".to_owned(),
            ));
        }
        if self.launcher.backend != "local" {
            return Err(ConfigError::Invalid(format!(
                "unsupported launcher backend {:?}",
                self.launcher.backend
            )));
        }
        if self.signing.key.is_some() {
            return Err(ConfigError::Invalid(
                "signing.key requires a remote signing deployment; this server uses an ephemeral in-memory key".to_owned(),
            ));
        }
        Ok(())
    }

    /// The hosted API or headscale base URL.
    pub fn control_base_url(&self) -> &str {
        self.tailscale
            .base_url
            .as_deref()
            .unwrap_or("https://api.tailscale.com")
    }
}

/// Overlays environment variables onto the configuration tree.
///
/// `PREFIX_A__B_C=value` sets the key `a.b-c`, matching how nested keys
/// are spelled in the file.
fn apply_env_overrides(
    value: &mut serde_json::Value,
    prefix: &str,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (name, raw) in vars {
        let Some(stripped) = name.strip_prefix(prefix) else {
            continue;
        };
        if stripped.is_empty() {
            continue;
        }

        let path: Vec<String> = stripped
            .to_lowercase()
            .split("__")
            .map(|segment| segment.replace('_', "-"))
            .collect();
        set_path(value, &path, serde_json::Value::String(raw));
    }
}

fn set_path(value: &mut serde_json::Value, path: &[String], leaf: serde_json::Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };

    if !value.is_object() {
        *value = serde_json::Value::Object(serde_json::Map::new());
    }
    let map = value.as_object_mut().expect("just ensured an object");

    if rest.is_empty() {
        map.insert(head.clone(), leaf);
    } else {
        let child = map
            .entry(head.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        set_path(child, rest, leaf);
    }
}
