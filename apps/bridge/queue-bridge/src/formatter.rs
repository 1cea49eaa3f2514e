//! Re-indents queued JSON for people reading the stream.
//!
//! Formatting runs in two passes: the value tree is rewritten (key order kept,
//! `Timestamp` fields converted to local time) and pretty-printed, then any
//! `\uXXXX` escapes left in the printed text are decoded so the client sees the
//! characters themselves. The second pass works on the final text because the
//! serializer re-escapes while writing.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::warn;

/// Field whose date-time value is rewritten, matched case-insensitively.
pub const TIMESTAMP_FIELD: &str = "Timestamp";

/// `yyyy-MM-dd HH:mm:ss`
pub const TIMESTAMP_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Zone-less layouts; `%.f` also matches when there is no fraction.
const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// An escaped backslash is consumed first so `\\u0041` is never read as an escape.
static UNICODE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\\\\|\\u([dD][89abAB][0-9a-fA-F]{2})\\u([dD][c-fC-F][0-9a-fA-F]{2})|\\u([0-9a-fA-F]{4})",
    )
    .unwrap()
});

/// Turns a raw queue payload into the text written to clients.
pub trait MessageFormatter: Send + Sync + 'static {
    /// Never fails: input that cannot be formatted comes back unchanged.
    fn format(&self, raw: &str) -> String;
}

/// Indented JSON with local-time timestamps and decoded unicode escapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyJsonFormatter;

impl MessageFormatter for PrettyJsonFormatter {
    fn format(&self, raw: &str) -> String {
        format_json(raw)
    }
}

/// Format `raw` as indented JSON, or return it untouched if it is not JSON.
pub fn format_json(raw: &str) -> String {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return raw.to_string(),
    };

    match serde_json::to_string_pretty(&reformat(value)) {
        Ok(pretty) => decode_unicode_escapes(&pretty).into_owned(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize reformatted JSON, passing payload through");
            raw.to_string()
        }
    }
}

fn reformat(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, value)| {
                    let value = if key.eq_ignore_ascii_case(TIMESTAMP_FIELD) {
                        rewrite_timestamp(value)
                    } else {
                        reformat(value)
                    };
                    (key, value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(reformat).collect()),
        scalar => scalar,
    }
}

fn rewrite_timestamp(value: Value) -> Value {
    match value {
        Value::String(raw) => match parse_timestamp(&raw) {
            Some(local) => Value::String(local.format(TIMESTAMP_OUTPUT_FORMAT).to_string()),
            None => Value::String(raw),
        },
        other => reformat(other),
    }
}

/// Parse a date-time in any of the accepted layouts and move it to local time.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Local));
    }

    NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc().with_timezone(&Local))
}

fn decode_unicode_escapes(text: &str) -> Cow<'_, str> {
    UNICODE_ESCAPE.replace_all(text, |caps: &Captures<'_>| {
        let decoded = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(high), Some(low), _) => {
                let high = u32::from_str_radix(high.as_str(), 16).ok();
                let low = u32::from_str_radix(low.as_str(), 16).ok();
                high.zip(low)
                    .and_then(|(h, l)| char::from_u32(0x10000 + ((h - 0xD800) << 10) + (l - 0xDC00)))
            }
            (_, _, Some(unit)) => u32::from_str_radix(unit.as_str(), 16)
                .ok()
                .and_then(char::from_u32),
            _ => None,
        };

        match decoded {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> String {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Local)
            .format(TIMESTAMP_OUTPUT_FORMAT)
            .to_string()
    }

    fn parsed(text: &str) -> Value {
        serde_json::from_str(text).expect("formatter output should stay valid JSON")
    }

    #[test]
    fn test_timestamp_is_rewritten_to_local_time() {
        let output = format_json(r#"{"Timestamp":"2024-01-01T10:00:00Z","Value":"x"}"#);
        let value = parsed(&output);

        assert_eq!(value["Timestamp"], local(2024, 1, 1, 10, 0, 0));
        assert_eq!(value["Value"], "x");
    }

    #[test]
    fn test_timestamp_with_offset() {
        let output = format_json(r#"{"Timestamp":"2024-06-30T23:30:00+03:00"}"#);
        assert_eq!(parsed(&output)["Timestamp"], local(2024, 6, 30, 20, 30, 0));
    }

    #[test]
    fn test_timestamp_key_is_case_insensitive() {
        let output = format_json(r#"{"timestamp":"2024-01-01T10:00:00Z","TIMESTAMP":"2024-01-02T10:00:00Z"}"#);
        let value = parsed(&output);
        assert_eq!(value["timestamp"], local(2024, 1, 1, 10, 0, 0));
        assert_eq!(value["TIMESTAMP"], local(2024, 1, 2, 10, 0, 0));
    }

    #[test]
    fn test_naive_timestamp_is_taken_as_utc() {
        let output = format_json(r#"{"Timestamp":"2024-03-05 08:15:30.250"}"#);
        assert_eq!(parsed(&output)["Timestamp"], local(2024, 3, 5, 8, 15, 30));

        let output = format_json(r#"{"Timestamp":"2024-03-05"}"#);
        assert_eq!(parsed(&output)["Timestamp"], local(2024, 3, 5, 0, 0, 0));
    }

    #[test]
    fn test_unparseable_timestamp_is_kept() {
        let output = format_json(r#"{"Timestamp":"yesterday at noon"}"#);
        assert_eq!(parsed(&output)["Timestamp"], "yesterday at noon");
    }

    #[test]
    fn test_non_string_timestamp_is_kept() {
        let output = format_json(r#"{"Timestamp":1704103200,"Other":{"Timestamp":null}}"#);
        let value = parsed(&output);
        assert_eq!(value["Timestamp"], 1704103200);
        assert!(value["Other"]["Timestamp"].is_null());
    }

    #[test]
    fn test_nested_timestamps_in_arrays() {
        let output = format_json(
            r#"{"events":[{"Timestamp":"2024-01-01T10:00:00Z","id":1},{"id":2}],"Timestamp":"bad"}"#,
        );
        let value = parsed(&output);
        assert_eq!(value["events"][0]["Timestamp"], local(2024, 1, 1, 10, 0, 0));
        assert_eq!(value["events"][0]["id"], 1);
        assert_eq!(value["events"][1]["id"], 2);
        assert_eq!(value["Timestamp"], "bad");
    }

    #[test]
    fn test_output_is_indented_and_keeps_key_order() {
        let output = format_json(r#"{"zeta":1,"alpha":[true,null]}"#);
        assert_eq!(
            output,
            "{\n  \"zeta\": 1,\n  \"alpha\": [\n    true,\n    null\n  ]\n}"
        );
    }

    #[test]
    fn test_numbers_are_emitted_verbatim() {
        let output = format_json(r#"{"small":1e3,"big":123456789012345678901234567890,"f":1.50}"#);
        assert!(output.contains("1e3"));
        assert!(output.contains("123456789012345678901234567890"));
        assert!(output.contains("1.50"));
    }

    #[test]
    fn test_malformed_json_passes_through() {
        for raw in [r#"{"Timestamp":"#, "not json", "{'single':'quotes'}", "   "] {
            assert_eq!(format_json(raw), raw);
        }
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert_eq!(format_json(""), "");
    }

    #[test]
    fn test_escaped_unicode_input_comes_out_literal() {
        let output = format_json(
            r#"{"name":"\u041f\u0440\u0438\u0432\u0435\u0442","emoji":"\ud83d\ude00"}"#,
        );
        assert!(output.contains("Привет"));
        assert!(output.contains('😀'));
        assert!(!output.contains("\\u"));
    }

    #[test]
    fn test_control_characters_are_decoded() {
        let output = format_json(r#"{"bell":"a\u0007b"}"#);
        assert!(output.contains("a\u{7}b"));
    }

    #[test]
    fn test_escaped_backslash_is_not_an_escape() {
        // The string value is the six characters `\u0041`, not an escape.
        let output = format_json(r#"{"path":"\\u0041"}"#);
        assert!(output.contains(r#""\\u0041""#));
    }

    #[test]
    fn test_decode_surrogate_pairs_and_lone_surrogates() {
        assert_eq!(decode_unicode_escapes(r"\ud83d\ude00"), "😀");
        assert_eq!(decode_unicode_escapes(r"\u00e9t\u00E9"), "été");
        assert_eq!(decode_unicode_escapes(r"\ud83d alone"), r"\ud83d alone");
        assert_eq!(decode_unicode_escapes(r"no escapes"), "no escapes");
    }

    #[test]
    fn test_pretty_formatter_delegates() {
        assert_eq!(PrettyJsonFormatter.format("[1]"), "[\n  1\n]");
    }
}
