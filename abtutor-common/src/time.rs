//! Timestamp utilities

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp the way it is stored in the database (RFC 3339)
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a database timestamp column back into UTC
pub fn from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

/// Parse an optional database timestamp column
pub fn from_db_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| from_db(&s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_db_roundtrip_preserves_instant() {
        let ts = now();
        let parsed = from_db(&to_db(ts)).unwrap();
        assert_eq!(parsed.timestamp_millis(), ts.timestamp_millis());
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        assert!(from_db("not a timestamp").is_err());
    }

    #[test]
    fn test_from_db_opt_none_passes_through() {
        assert_eq!(from_db_opt(None).unwrap(), None);
    }
}
