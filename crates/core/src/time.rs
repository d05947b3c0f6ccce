use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Result, TraceError};

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TraceError::Parse(format!("invalid duration {input}: {e}")))
}

/// RFC3339 with nanosecond precision and a `Z` suffix, as used on the wire.
pub fn rfc3339_nanos(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_duration() {
        assert_eq!(parse_duration_str("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(
            parse_duration_str("250ms").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn rejects_invalid_duration() {
        assert!(parse_duration_str("soon").is_err());
    }

    #[test]
    fn formats_with_nanos() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(rfc3339_nanos(&ts), "2026-02-01T00:00:00.000000000Z");
    }
}
