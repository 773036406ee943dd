// Small helpers shared across modules: clock, id generation, verbose logging

use serde::{Deserialize, Serialize};

/// Log at `info` when verbose output is enabled, `debug` otherwise.
macro_rules! verbose {
    ($on:expr, $($arg:tt)+) => {
        if $on {
            log::info!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}

pub(crate) use verbose;

/// Current time in whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current time in milliseconds since the Unix epoch.
pub fn unix_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Strategy used to generate `_id` values for new documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

/// Parse a date string into epoch seconds (UTC).
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`.
pub fn parse_date_seconds(input: &str) -> Option<i64> {
    let input = input.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        for strategy in [IdStrategy::Ulid, IdStrategy::Uuid, IdStrategy::Nanoid] {
            let a = strategy.generate();
            let b = strategy.generate();
            assert!(!a.is_empty());
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_ulid_ids_are_lowercase() {
        let id = IdStrategy::Ulid.generate();
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_parse_date_seconds() {
        assert_eq!(parse_date_seconds("1970-01-02"), Some(86_400));
        assert_eq!(parse_date_seconds("1970-01-01 00:01:00"), Some(60));
        assert_eq!(parse_date_seconds("1970-01-01T00:00:10Z"), Some(10));
        assert_eq!(parse_date_seconds("not a date"), None);
    }
}
