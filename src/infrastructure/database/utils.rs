//! Datetime parsing tolerant of RFC3339 and SQLite's bare datetime format.

use chrono::{DateTime, NaiveDateTime, Utc};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let dt = parse_datetime("2025-10-29T17:28:13Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-29T17:28:13+00:00");
    }

    #[test]
    fn parses_sqlite_bare_format() {
        let dt = parse_datetime("2025-10-29 17:28:13").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-29T17:28:13+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("not a date").is_err());
    }
}
