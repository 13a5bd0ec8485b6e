//! Timestamp normalization to RFC3339 UTC without fractional seconds
//! (spec §4.C, §8).

use chrono::{DateTime, Utc};

/// Parse an RFC3339 timestamp (with or without fractional seconds,
/// any offset) and return it as RFC3339 UTC without fractional
/// seconds. On parse failure, logs and returns an empty string.
pub fn normalize(input: &str) -> String {
    match DateTime::parse_from_rfc3339(input) {
        Ok(dt) => dt.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        Err(err) => {
            tracing::warn!(input, error = %err, "failed to parse timestamp");
            String::new()
        }
    }
}

/// Truncate an RFC3339 UTC timestamp to the hour, for hashtag bucketing
/// (spec §3, §4.C).
pub fn truncate_to_hour(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:00:00Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_offset_to_utc_without_fraction() {
        assert_eq!(normalize("2024-01-01T12:00:00+05:00"), "2024-01-01T07:00:00Z");
    }

    #[test]
    fn normalizes_nanoseconds_away() {
        assert_eq!(normalize("2024-01-01T12:00:00.123456789Z"), "2024-01-01T12:00:00Z");
    }

    #[test]
    fn already_utc_round_trips() {
        assert_eq!(normalize("2024-06-15T08:30:00Z"), "2024-06-15T08:30:00Z");
    }

    #[test]
    fn invalid_input_returns_empty_string() {
        assert_eq!(normalize("not-a-timestamp"), "");
    }

    #[test]
    fn truncates_to_hour() {
        let dt = DateTime::parse_from_rfc3339("2024-01-01T12:45:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(truncate_to_hour(&dt), "2024-01-01T12:00:00Z");
    }
}
