//! Lenient timestamp parsing shared by the HTTP API and the file sources.
//!
//! Accepted shapes, tried in order:
//! - RFC 3339 (`2024-01-01T12:00:00Z`, `2024-01-01T12:00:00+02:00`)
//! - `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD HH:MM:SS`
//! - `YYYY-MM-DD`
//! - `DD/MM/YYYY HH:MM`
//! - `YYYYMMDD`
//!
//! Values without an offset are taken as UTC.

use serde::{de, Deserialize, Deserializer};
use time::{
    format_description::{well_known::Rfc3339, BorrowedFormatItem},
    macros::format_description,
    Date, OffsetDateTime, PrimitiveDateTime,
};

const NAIVE_DATETIME_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[day]/[month]/[year] [hour]:[minute]"),
];

const DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]"),
    format_description!("[year][month][day]"),
];

pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = PrimitiveDateTime::parse(s, fmt) {
            return Some(dt.assume_utc());
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = Date::parse(s, fmt) {
            return Some(date.midnight().assume_utc());
        }
    }

    None
}

/// `deserialize_with` helper for required timestamp fields.
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
}

/// `deserialize_with` helper for optional timestamp fields.
pub mod option {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(ts, datetime!(2024-03-01 10:30:00 UTC));
    }

    #[test]
    fn naive_values_are_utc() {
        assert_eq!(
            parse_timestamp("2023-01-01T12:00:00"),
            Some(datetime!(2023-01-01 12:00:00 UTC))
        );
        assert_eq!(
            parse_timestamp("2023-01-01 12:00:00"),
            Some(datetime!(2023-01-01 12:00:00 UTC))
        );
        assert_eq!(
            parse_timestamp("15/06/2023 08:15"),
            Some(datetime!(2023-06-15 08:15:00 UTC))
        );
    }

    #[test]
    fn date_only_is_midnight() {
        assert_eq!(parse_timestamp("2023-01-02"), Some(datetime!(2023-01-02 00:00:00 UTC)));
        assert_eq!(parse_timestamp("20230102"), Some(datetime!(2023-01-02 00:00:00 UTC)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2023-13-01").is_none());
    }
}
