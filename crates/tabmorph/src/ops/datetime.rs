//! Date operations. Every failure (unparseable input, unknown zone, invalid
//! pattern) yields `null`.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;

use crate::rule::TimeUnit;
use crate::value::{to_float, to_text};

const ISO_AWARE: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const ISO_NAIVE: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const FLEXIBLE_AWARE: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

const FLEXIBLE_NAIVE: [&str; 9] = [
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%d %B %Y %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
    "%b %d, %Y %H:%M:%S",
    "%Y%m%dT%H%M%S",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

const FLEXIBLE_DATE: [&str; 10] = [
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%Y%m%d",
];

/// A parsed timestamp, with or without a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Moment {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

impl Moment {
    /// `YYYY-MM-DDTHH:MM:SS[.ffffff][+HH:MM]`; microseconds only when non-zero.
    fn isoformat(&self) -> String {
        match self {
            Moment::Naive(dt) => iso_naive(dt),
            Moment::Aware(dt) => format!("{}{}", iso_naive(&dt.naive_local()), dt.format("%:z")),
        }
    }

    fn strftime(&self, fmt: &str) -> Option<String> {
        let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return None;
        }
        let mut out = String::new();
        let written = match self {
            Moment::Naive(dt) => write!(out, "{}", dt.format_with_items(items.iter())),
            Moment::Aware(dt) => write!(out, "{}", dt.format_with_items(items.iter())),
        };
        written.ok().map(|_| out)
    }
}

fn iso_naive(dt: &NaiveDateTime) -> String {
    let mut out = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    let micros = (dt.nanosecond() % 1_000_000_000) / 1_000;
    if micros != 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

/// ISO-8601 as accepted by `fromisoformat`, with `Z` meaning UTC.
fn parse_iso(text: &str) -> Option<Moment> {
    let normalized = text.replace('Z', "+00:00");
    if let Some(dt) = ISO_AWARE
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
    {
        return Some(Moment::Aware(dt));
    }
    if let Some(dt) = ISO_NAIVE
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
    {
        return Some(Moment::Naive(dt));
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(midnight)
        .map(Moment::Naive)
}

/// Parses with an explicit pattern. Patterns without a date part land on
/// 1900-01-01.
fn strptime(text: &str, fmt: &str) -> Option<Moment> {
    if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
        return Some(Moment::Aware(dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
        return Some(Moment::Naive(dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
        return midnight(date).map(Moment::Naive);
    }
    let time = NaiveTime::parse_from_str(text, fmt).ok()?;
    NaiveDate::from_ymd_opt(1900, 1, 1).map(|date| Moment::Naive(date.and_time(time)))
}

/// ISO first, then RFC 3339/2822, then a list of common layouts.
fn parse_flexible(text: &str) -> Option<Moment> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(moment) = parse_iso(text) {
        return Some(moment);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Moment::Aware(dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(Moment::Aware(dt));
    }
    if let Some(dt) = FLEXIBLE_AWARE
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(text, fmt).ok())
    {
        return Some(Moment::Aware(dt));
    }
    if let Some(dt) = FLEXIBLE_NAIVE
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    {
        return Some(Moment::Naive(dt));
    }
    FLEXIBLE_DATE
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(midnight)
        .map(Moment::Naive)
}

fn text_or_null(value: Option<String>) -> JsonValue {
    value.map(JsonValue::String).unwrap_or(JsonValue::Null)
}

pub(super) fn date_format(source: &JsonValue, fmt: &str, fmt_in: Option<&str>) -> JsonValue {
    if source.is_null() {
        return JsonValue::Null;
    }
    let text = to_text(source);
    let moment = match fmt_in {
        Some(fmt_in) => strptime(&text, fmt_in),
        None => parse_iso(&text).or_else(|| parse_flexible(&text)),
    };
    text_or_null(moment.and_then(|moment| moment.strftime(fmt)))
}

pub(super) fn date_parse(text: &JsonValue, formats: &[String], strict: bool) -> JsonValue {
    if text.is_null() {
        return JsonValue::Null;
    }
    let text = to_text(text);
    let parsed = formats
        .iter()
        .find_map(|fmt| strptime(&text, fmt))
        .or_else(|| if strict { None } else { parse_flexible(&text) });
    text_or_null(parsed.map(|moment| moment.isoformat()))
}

pub(super) fn from_timestamp(sec: &JsonValue, unit: TimeUnit) -> JsonValue {
    let micros = to_float(sec)
        .map(|value| (value / unit.per_second() * 1_000_000.0).round())
        .filter(|micros| micros.is_finite() && micros.abs() < 9.2e18);
    let moment = micros
        .and_then(|micros| DateTime::<Utc>::from_timestamp_micros(micros as i64))
        .map(|dt| Moment::Aware(dt.fixed_offset()));
    text_or_null(moment.map(|moment| moment.isoformat()))
}

/// Naive inputs are read in `from` (UTC when absent). Ambiguous local times
/// take the earlier instant; nonexistent ones fail.
pub(super) fn to_timezone(dt: &JsonValue, from: Option<&str>, to: Option<&str>) -> JsonValue {
    let (false, Some(to)) = (dt.is_null(), to) else {
        return JsonValue::Null;
    };
    text_or_null(convert_zone(&to_text(dt), from, to))
}

fn convert_zone(text: &str, from: Option<&str>, to: &str) -> Option<String> {
    let target: Tz = to.parse().ok()?;
    let aware = match parse_iso(text)? {
        Moment::Aware(dt) => dt,
        Moment::Naive(naive) => match from {
            Some(from) => {
                let zone: Tz = from.parse().ok()?;
                zone.from_local_datetime(&naive).earliest()?.fixed_offset()
            }
            None => Utc.from_utc_datetime(&naive).fixed_offset(),
        },
    };
    Some(Moment::Aware(aware.with_timezone(&target).fixed_offset()).isoformat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_iso_input() {
        assert_eq!(
            date_format(&json!("2024-03-05T07:08:09Z"), "%Y/%m/%d %H:%M", None),
            json!("2024/03/05 07:08")
        );
        assert_eq!(
            date_format(&json!("2024-03-05"), "%Y-%m-%d %H:%M:%S", None),
            json!("2024-03-05 00:00:00")
        );
    }

    #[test]
    fn formats_with_explicit_input_pattern() {
        assert_eq!(
            date_format(&json!("05/03/2024 10:30"), "%Y-%m-%dT%H:%M", Some("%d/%m/%Y %H:%M")),
            json!("2024-03-05T10:30")
        );
        assert_eq!(
            date_format(&json!("2024-03-05"), "%Y", Some("%d/%m/%Y")),
            JsonValue::Null
        );
    }

    #[test]
    fn falls_back_to_flexible_layouts() {
        assert_eq!(
            date_format(&json!("March 5, 2024"), "%Y-%m-%d", None),
            json!("2024-03-05")
        );
        assert_eq!(date_format(&json!("not a date"), "%Y", None), JsonValue::Null);
        assert_eq!(date_format(&json!(null), "%Y", None), JsonValue::Null);
    }

    #[test]
    fn invalid_output_pattern_is_null() {
        assert_eq!(date_format(&json!("2024-03-05"), "%Q", None), JsonValue::Null);
        assert_eq!(date_format(&json!("2024-03-05"), "%z", None), JsonValue::Null);
    }

    #[test]
    fn parse_tries_formats_in_order() {
        let formats = vec!["%d.%m.%Y".to_string(), "%Y%m%d".to_string()];
        assert_eq!(
            date_parse(&json!("20240305"), &formats, true),
            json!("2024-03-05T00:00:00")
        );
        assert_eq!(
            date_parse(&json!("2024-03-05T01:02:03.250+02:00"), &formats, true),
            JsonValue::Null
        );
        assert_eq!(
            date_parse(&json!("2024-03-05T01:02:03.250+02:00"), &formats, false),
            json!("2024-03-05T01:02:03.250000+02:00")
        );
    }

    #[test]
    fn timestamps_in_each_unit() {
        assert_eq!(
            from_timestamp(&json!(0), TimeUnit::Seconds),
            json!("1970-01-01T00:00:00+00:00")
        );
        assert_eq!(
            from_timestamp(&json!(1_700_000_000_123i64), TimeUnit::Millis),
            json!("2023-11-14T22:13:20.123000+00:00")
        );
        assert_eq!(
            from_timestamp(&json!("86400"), TimeUnit::Seconds),
            json!("1970-01-02T00:00:00+00:00")
        );
        assert_eq!(from_timestamp(&json!("soon"), TimeUnit::Seconds), JsonValue::Null);
    }

    #[test]
    fn converts_between_zones() {
        assert_eq!(
            to_timezone(&json!("2024-01-01T00:00:00Z"), None, Some("Asia/Tokyo")),
            json!("2024-01-01T09:00:00+09:00")
        );
        assert_eq!(
            to_timezone(&json!("2024-07-01T12:00:00"), Some("America/New_York"), Some("UTC")),
            json!("2024-07-01T16:00:00+00:00")
        );
        assert_eq!(
            to_timezone(&json!("2024-01-01T00:00:00"), None, Some("Mars/Olympus")),
            JsonValue::Null
        );
        assert_eq!(to_timezone(&json!("2024-01-01"), None, None), JsonValue::Null);
    }
}
