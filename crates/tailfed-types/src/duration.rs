//! Go-compatible duration strings.
//!
//! The daemon configuration document advertises its refresh frequency the way
//! the rest of the Tailscale ecosystem does: either as a duration string such
//! as `"1h30m"` or `"500ms"`, or as an integer nanosecond count. This module
//! provides a [`GoDuration`] wrapper that parses and renders both forms.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A non-negative duration that serializes as a Go duration string.
///
/// Serialization always produces the string form (`"45m0s"`, `"1.5s"`,
/// `"500ms"`); deserialization additionally accepts a bare integer, which is
/// interpreted as nanoseconds.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tailfed_types::GoDuration;
///
/// let freq: GoDuration = "1h30m".parse().unwrap();
/// assert_eq!(freq.as_duration(), Duration::from_secs(5400));
/// assert_eq!(freq.to_string(), "1h30m0s");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GoDuration(pub Duration);

impl GoDuration {
    /// Wraps a [`Duration`].
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Returns the inner [`Duration`].
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<GoDuration> for Duration {
    fn from(duration: GoDuration) -> Self {
        duration.0
    }
}

/// Failure to parse a Go duration string.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration {0:?}")]
pub struct ParseDurationError(pub String);

impl FromStr for GoDuration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = || ParseDurationError(s.to_owned());

        let mut rest = s.strip_prefix('+').unwrap_or(s);
        if rest.is_empty() {
            return Err(fail());
        }
        if rest == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total: u128 = 0;
        while !rest.is_empty() {
            // integer part
            let int_len = rest.chars().take_while(char::is_ascii_digit).count();
            let (int_str, after_int) = rest.split_at(int_len);

            // optional fraction
            let (frac_str, after_frac) = match after_int.strip_prefix('.') {
                Some(tail) => {
                    let frac_len = tail.chars().take_while(char::is_ascii_digit).count();
                    tail.split_at(frac_len)
                }
                None => ("", after_int),
            };
            if int_str.is_empty() && frac_str.is_empty() {
                return Err(fail());
            }

            let unit_len = after_frac
                .chars()
                .take_while(|c| !c.is_ascii_digit() && *c != '.')
                .map(char::len_utf8)
                .sum::<usize>();
            let (unit, tail) = after_frac.split_at(unit_len);
            let scale: u128 = match unit {
                "ns" => 1,
                "us" | "µs" | "μs" => 1_000,
                "ms" => 1_000_000,
                "s" => NANOS_PER_SEC,
                "m" => 60 * NANOS_PER_SEC,
                "h" => 3600 * NANOS_PER_SEC,
                _ => return Err(fail()),
            };

            let integer: u128 = if int_str.is_empty() {
                0
            } else {
                int_str.parse().map_err(|_| fail())?
            };
            total = total
                .checked_add(integer.checked_mul(scale).ok_or_else(fail)?)
                .ok_or_else(fail)?;

            if !frac_str.is_empty() {
                let mut frac = 0u128;
                let mut denom = 1u128;
                for c in frac_str.bytes().take(18) {
                    frac = frac * 10 + u128::from(c - b'0');
                    denom *= 10;
                }
                total = total.checked_add(frac * scale / denom).ok_or_else(fail)?;
            }

            rest = tail;
        }

        let secs = (total / NANOS_PER_SEC) as u64;
        let nanos = (total % NANOS_PER_SEC) as u32;
        Ok(Self(Duration::new(secs, nanos)))
    }
}

impl fmt::Display for GoDuration {
    /// Renders the duration the way Go's `time.Duration` does: `"0s"`,
    /// `"1.5µs"`, `"500ms"`, `"2m0.5s"`, `"1h30m0s"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return write!(f, "0s");
        }

        if nanos < NANOS_PER_SEC {
            // sub-second: pick ns, µs, or ms
            let (scale, unit) = if nanos < 1_000 {
                (1, "ns")
            } else if nanos < 1_000_000 {
                (1_000, "µs")
            } else {
                (1_000_000, "ms")
            };
            write_decimal(f, nanos / scale, nanos % scale, scale)?;
            return write!(f, "{unit}");
        }

        let hours = nanos / (3600 * NANOS_PER_SEC);
        let minutes = (nanos / (60 * NANOS_PER_SEC)) % 60;
        let secs = (nanos / NANOS_PER_SEC) % 60;
        let frac = nanos % NANOS_PER_SEC;

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        write_decimal(f, secs, frac, NANOS_PER_SEC)?;
        write!(f, "s")
    }
}

/// Writes `integer` followed by the fraction `frac/scale` with trailing
/// zeros trimmed.
fn write_decimal(f: &mut fmt::Formatter<'_>, integer: u128, frac: u128, scale: u128) -> fmt::Result {
    write!(f, "{integer}")?;
    if frac == 0 {
        return Ok(());
    }

    let mut digits = String::new();
    let mut remainder = frac;
    let mut divisor = scale / 10;
    while divisor > 0 {
        digits.push(char::from(b'0' + (remainder / divisor) as u8));
        remainder %= divisor;
        divisor /= 10;
    }
    write!(f, ".{}", digits.trim_end_matches('0'))
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = GoDuration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration string or integer nanoseconds")
            }

            fn visit_u64<E: de::Error>(self, nanos: u64) -> Result<Self::Value, E> {
                Ok(GoDuration(Duration::from_nanos(nanos)))
            }

            fn visit_i64<E: de::Error>(self, nanos: i64) -> Result<Self::Value, E> {
                u64::try_from(nanos)
                    .map(|n| GoDuration(Duration::from_nanos(n)))
                    .map_err(|_| E::custom("duration must be non-negative"))
            }

            fn visit_f64<E: de::Error>(self, nanos: f64) -> Result<Self::Value, E> {
                if nanos < 0.0 || nanos.fract() != 0.0 {
                    return Err(E::custom("duration must be a non-negative integer"));
                }
                Ok(GoDuration(Duration::from_nanos(nanos as u64)))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
