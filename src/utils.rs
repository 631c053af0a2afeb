//! Utility functions for the telemetry pipeline

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

/// Layouts the plugin emits without a UTC offset; these are read as UTC
const OFFSETLESS_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique player ID
pub fn generate_player_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a textual event timestamp.
///
/// RFC 3339 with an explicit offset is tried first, then the offset-less
/// layouts, which are assumed to be UTC.
pub fn parse_event_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    OFFSETLESS_LAYOUTS.iter().find_map(|layout| {
        NaiveDateTime::parse_from_str(value, layout)
            .ok()
            .map(|naive| naive.and_utc())
    })
}

/// Convert Unix seconds into a UTC timestamp
pub fn timestamp_from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// First `limit` bytes of a payload, lossily decoded, for log lines
pub fn payload_preview(payload: &[u8], limit: usize) -> String {
    let end = payload.len().min(limit);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_match_id(), generate_match_id());
        assert_ne!(generate_player_id(), generate_player_id());
    }

    #[test]
    fn test_timestamp_layouts_agree() {
        let expected = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_event_timestamp("2024-02-01T12:00:00"), Some(expected));
        assert_eq!(parse_event_timestamp("2024-02-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_event_timestamp("2024-02-01 12:00:00"), Some(expected));
        assert_eq!(
            parse_event_timestamp("2024-02-01T14:00:00+02:00"),
            Some(expected)
        );
    }

    #[test]
    fn test_fractional_seconds() {
        let parsed = parse_event_timestamp("2024-02-01T12:00:00.250").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(parse_event_timestamp("yesterday"), None);
        assert_eq!(parse_event_timestamp(""), None);
    }

    #[test]
    fn test_unix_seconds() {
        let parsed = timestamp_from_unix(1706788800).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_payload_preview_truncates() {
        assert_eq!(payload_preview(b"KILL|1|2|3", 4), "KILL");
        assert_eq!(payload_preview(b"ok", 100), "ok");
    }
}
