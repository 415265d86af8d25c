//! Build information served at `/version.json`.

use serde::{Deserialize, Serialize};

/// Details about a Tailfed binary, captured at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Semantic version of the binary.
    pub version: String,
    /// VCS revision the binary was built from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Target triple the binary was built for, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl BuildInfo {
    /// Captures the calling crate's build information.
    ///
    /// The commit is taken from the `TAILFED_BUILD_COMMIT` environment
    /// variable at compile time, when the build system provides one.
    pub fn capture(version: &str) -> Self {
        Self {
            version: version.to_owned(),
            commit: option_env!("TAILFED_BUILD_COMMIT").map(str::to_owned),
            platform: option_env!("TARGET").map(str::to_owned),
        }
    }

    /// Parses the `major.minor` prefix of the version.
    pub fn major_minor(&self) -> Option<(u64, u64)> {
        parse_major_minor(&self.version)
    }
}

/// Parses the leading `major.minor` out of a version string, ignoring any
/// patch component, pre-release tag, or build metadata.
pub fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let core = version
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or_default();
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}
