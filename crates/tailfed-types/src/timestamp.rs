//! Unix timestamps with second resolution.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Seconds since the Unix epoch, used for flow and token expiry.
///
/// Serialized as a stringified integer so the value survives JSON consumers
/// whose number type cannot represent all 64-bit integers.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tailfed_types::UnixTime;
///
/// let expires = UnixTime::from_secs(1_699_999_999) + Duration::from_secs(300);
/// assert_eq!(expires.as_secs(), 1_700_000_299);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixTime(u64);

impl UnixTime {
    /// Creates a timestamp from raw seconds since the epoch.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time.
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Self(now)
    }

    /// Returns the raw seconds since the epoch.
    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl Add<Duration> for UnixTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_secs()))
    }
}

impl Display for UnixTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let secs = raw
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(Self(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_as_string() {
        let ts = UnixTime::from_secs(1_699_999_999);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"1699999999\"");
    }

    #[test]
    fn test_roundtrip() {
        let original = UnixTime::from_secs(42);
        let json = serde_json::to_string(&original).unwrap();
        let decoded: UnixTime = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_deserialize_rejects_number() {
        let result: Result<UnixTime, _> = serde_json::from_str("1699999999");
        assert!(result.is_err());
    }

    #[test]
    fn test_ordering() {
        let earlier = UnixTime::from_secs(100);
        let later = earlier + Duration::from_secs(1);
        assert!(earlier < later);
    }
}
