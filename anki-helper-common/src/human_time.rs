//! Human-readable durations
//!
//! Configuration files express timeouts and pauses as compact duration
//! strings: a sequence of decimal numbers, each with an optional fraction and
//! a unit suffix, e.g. `300ms`, `1.5s`, `2m`, `1h30m`. Valid units are `ns`,
//! `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is accepted as zero.
//!
//! ```
//! use anki_helper_common::human_time::{format_duration, parse_duration};
//! use std::time::Duration;
//!
//! assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
//! assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
//! assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
//! ```

use crate::{Error, Result};
use std::time::Duration;

const NANOS_PER_MICRO: f64 = 1e3;
const NANOS_PER_MILLI: f64 = 1e6;
const NANOS_PER_SECOND: f64 = 1e9;
const NANOS_PER_MINUTE: f64 = 60.0 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: f64 = 60.0 * NANOS_PER_MINUTE;

/// Parse a compact duration string such as `1h30m`.
///
/// Negative durations are rejected since every configured duration is a
/// pause or a timeout.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let invalid = |reason: &str| Error::Parse(format!("invalid duration {:?}: {}", input, reason));

    if trimmed.is_empty() {
        return Err(invalid("empty string"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if rest.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after_number) = rest.split_at(number_end);
        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| invalid(&format!("malformed number {:?}", number)))?;

        let unit_end = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, after_unit) = after_number.split_at(unit_end);
        let unit_nanos = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_MINUTE,
            "h" => NANOS_PER_HOUR,
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit {:?}", other))),
        };

        total_nanos += value * unit_nanos;
        rest = after_unit;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid("overflow"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format a duration the way [`parse_duration`] reads it.
///
/// Sub-second durations use the largest unit that keeps an integral or short
/// fractional value (`250ms`, `1.5µs`); longer ones use `h`/`m`/`s` parts
/// (`1h30m0s`, `2m5.5s`).
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let nanos = duration.as_nanos();
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}µs", trim_fraction(nanos as f64 / NANOS_PER_MICRO));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", trim_fraction(nanos as f64 / NANOS_PER_MILLI));
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = (total_secs % 60) as f64 + f64::from(duration.subsec_nanos()) / NANOS_PER_SECOND;

    let mut formatted = String::new();
    if hours > 0 {
        formatted.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        formatted.push_str(&format!("{}m", minutes));
    }
    formatted.push_str(&format!("{}s", trim_fraction(seconds)));
    formatted
}

fn trim_fraction(value: f64) -> String {
    let formatted = format!("{:.3}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
