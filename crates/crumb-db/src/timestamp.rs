//! Timestamp column encoding.
//!
//! All timestamps are stored as RFC 3339 UTC strings with microsecond
//! precision and a `Z` suffix, so lexical order in SQL matches time order.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn encode(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{raw}': {e}")))
}

pub fn decode_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode).transpose()
}

/// Truncate to the stored precision.
pub fn stored(at: DateTime<Utc>) -> DateTime<Utc> {
    decode(&encode(at)).unwrap_or(at)
}
