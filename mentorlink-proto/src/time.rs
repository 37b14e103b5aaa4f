//! Timestamp wire representation.
//!
//! The backend serializes dates as RFC 3339 strings (`2024-05-01T10:00:00.000Z`),
//! but some emitters send epoch milliseconds instead. Both are accepted on
//! decode; encode always produces the string form with millisecond precision.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
}

impl RawTimestamp {
    fn into_datetime<E: serde::de::Error>(self) -> Result<DateTime<Utc>, E> {
        match self {
            Self::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp {text:?}: {e}"))),
            Self::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp {ms} out of range"))),
        }
    }
}

/// Format a timestamp the way the backend does.
#[must_use]
pub fn format(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
///
/// Use with `#[serde(default, with = "crate::time::option")]`; a missing or
/// `null` field decodes to `None`.
pub mod option {
    use super::{DateTime, Deserialize, Deserializer, RawTimestamp, Serializer, Utc};

    /// Serialize as an RFC 3339 string, or `null`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(timestamp) => serializer.serialize_str(&super::format(timestamp)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from an RFC 3339 string, epoch milliseconds, or `null`.
    ///
    /// # Errors
    ///
    /// Returns an error for strings that are not RFC 3339 and for
    /// out-of-range millisecond values.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<RawTimestamp>::deserialize(deserializer)?
            .map(RawTimestamp::into_datetime)
            .transpose()
    }
}
