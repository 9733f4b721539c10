//! Attribute value normalization
//!
//! Profile attribute values come in compounded time units (`1h30m`, `2s450ms`),
//! byte units (`1.5 GB`, case-insensitive, optional space), plain integers
//! and decimals. Unknown shapes are retained verbatim as text.

use super::models::AttrValue;
use once_cell::sync::Lazy;
use regex::Regex;

static BYTES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*([KkMmGgTt]?[Bb])$").unwrap());

pub struct ValueParser;

impl ValueParser {
    /// Parse a compound time expression to milliseconds.
    ///
    /// Units: `h`, `m`, `s`, `ms`, `us`, `ns`; components may be chained
    /// (`1h30m`, `2s450ms`). Returns `None` when no time unit is present.
    pub fn parse_time_to_ms(s: &str) -> Option<f64> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        let mut total_ms = 0.0;
        let mut num_buf = String::new();
        let mut found_unit = false;
        let chars: Vec<char> = s.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c.is_ascii_digit() || c == '.' {
                num_buf.push(c);
                i += 1;
            } else {
                let value: f64 = num_buf.parse().unwrap_or(0.0);
                num_buf.clear();

                if c == 'h' {
                    total_ms += value * 3_600_000.0;
                    found_unit = true;
                    i += 1;
                } else if c == 'm' {
                    if i + 1 < chars.len() && chars[i + 1] == 's' {
                        total_ms += value;
                        i += 2;
                    } else {
                        total_ms += value * 60_000.0;
                        i += 1;
                    }
                    found_unit = true;
                } else if c == 's' {
                    total_ms += value * 1000.0;
                    found_unit = true;
                    i += 1;
                } else if c == 'u' && i + 1 < chars.len() && chars[i + 1] == 's' {
                    total_ms += value / 1000.0;
                    found_unit = true;
                    i += 2;
                } else if c == 'n' && i + 1 < chars.len() && chars[i + 1] == 's' {
                    total_ms += value / 1_000_000.0;
                    found_unit = true;
                    i += 2;
                } else {
                    return None; // unknown unit: not a time value
                }
            }
        }

        if found_unit && num_buf.is_empty() { Some(total_ms) } else { None }
    }

    /// Parse a byte size (`B`/`KB`/`MB`/`GB`/`TB`, case-insensitive).
    pub fn parse_bytes(s: &str) -> Option<u64> {
        let caps = BYTES_REGEX.captures(s.trim())?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_uppercase();
        let multiplier: u64 = match unit.as_str() {
            "B" => 1,
            "KB" => 1024,
            "MB" => 1024 * 1024,
            "GB" => 1024 * 1024 * 1024,
            "TB" => 1024u64.pow(4),
            _ => return None,
        };
        Some((value * multiplier as f64) as u64)
    }

    /// Normalize a raw attribute value into its typed form.
    pub fn normalize(raw: &str) -> AttrValue {
        let trimmed = raw.trim();

        if let Some(ms) = Self::parse_time_to_ms(trimmed) {
            return AttrValue::TimeMs(ms);
        }
        if let Some(bytes) = Self::parse_bytes(trimmed) {
            return AttrValue::Bytes(bytes);
        }
        // Thousands separators appear in counter values.
        let plain = trimmed.replace(',', "");
        if let Ok(i) = plain.parse::<i64>() {
            return AttrValue::Int(i);
        }
        if let Ok(f) = plain.parse::<f64>() {
            return AttrValue::Float(f);
        }
        AttrValue::Text(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_time_units() {
        assert_eq!(ValueParser::parse_time_to_ms("10s"), Some(10_000.0));
        assert_eq!(ValueParser::parse_time_to_ms("1h30m"), Some(5_400_000.0));
        assert_eq!(ValueParser::parse_time_to_ms("2s450ms"), Some(2450.0));
        assert_eq!(ValueParser::parse_time_to_ms("15ms"), Some(15.0));
        assert_eq!(ValueParser::parse_time_to_ms("250us"), Some(0.25));
        assert_eq!(ValueParser::parse_time_to_ms("500ns"), Some(0.0005));
    }

    #[test]
    fn time_round_trip_within_microsecond() {
        // §8 invariant 6: any compound rendering of t ms parses back to t.
        let t = 5_432_100.5; // 1h30m32s100ms500us
        let rendered = "1h30m32s100ms500us";
        let parsed = ValueParser::parse_time_to_ms(rendered).unwrap();
        assert!((parsed - t).abs() < 0.001, "parsed {} expected {}", parsed, t);
    }

    #[test]
    fn non_time_values_are_rejected() {
        assert_eq!(ValueParser::parse_time_to_ms("12345"), None);
        assert_eq!(ValueParser::parse_time_to_ms("1.5 GB"), None);
        assert_eq!(ValueParser::parse_time_to_ms("hello"), None);
    }

    #[test]
    fn byte_units_case_insensitive() {
        assert_eq!(ValueParser::parse_bytes("1.5 GB"), Some(1_610_612_736));
        assert_eq!(ValueParser::parse_bytes("100MB"), Some(104_857_600));
        assert_eq!(ValueParser::parse_bytes("2 kb"), Some(2048));
        assert_eq!(ValueParser::parse_bytes("512B"), Some(512));
        assert_eq!(ValueParser::parse_bytes("12 rows"), None);
    }

    #[test]
    fn normalize_types() {
        assert_eq!(ValueParser::normalize("10s"), AttrValue::TimeMs(10_000.0));
        assert_eq!(ValueParser::normalize("1.5 GB"), AttrValue::Bytes(1_610_612_736));
        assert_eq!(ValueParser::normalize("1,234,567"), AttrValue::Int(1_234_567));
        assert_eq!(ValueParser::normalize("3.25"), AttrValue::Float(3.25));
        assert_eq!(
            ValueParser::normalize("FINISHED"),
            AttrValue::Text("FINISHED".to_string())
        );
    }
}
