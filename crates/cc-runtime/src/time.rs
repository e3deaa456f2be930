//! Time and duration parsing, formatting and arithmetic helpers.
//!
//! Times are UTC instants. Durations are signed millisecond spans; calendar
//! units are fixed (a month is 30 days, a year 365 days).

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

use crate::numeric::{format_number, parse_number};

/// Milliseconds in one second.
pub const SECOND_MS: i64 = 1000;
/// Milliseconds in one minute.
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * HOUR_MS;

const WEEK_MS: i64 = 7 * DAY_MS;
const MONTH_MS: i64 = 30 * DAY_MS;
const YEAR_MS: i64 = 365 * DAY_MS;

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r"^([+-])?P",
            r"(?:(\d+(?:\.\d+)?)Y)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)W)?(?:(\d+(?:\.\d+)?)D)?",
            r"(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
        ),
    )
    .expect("valid regex")
});

static CLOCK_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?(?:(\d+)\.)?(\d+):(\d{1,2})(?::(\d{1,2})(?:\.(\d{1,3}))?)?$")
        .expect("valid regex")
});

static HUMAN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([a-zA-Z]+)").expect("valid regex"));

static HUMAN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:[\s,]|\band\b)*$").expect("valid regex"));

/// Build a duration from a possibly fractional, possibly out-of-range millisecond count.
pub fn duration_from_ms(ms: f64) -> Option<chrono::Duration> {
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    chrono::Duration::try_milliseconds(ms.round() as i64)
}

/// Build an instant from a millisecond epoch timestamp.
pub fn time_from_ms(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(ms.round() as i64).single()
}

/// Total milliseconds of a duration, as a script number.
pub fn duration_ms(d: chrono::Duration) -> f64 {
    d.num_milliseconds() as f64
}

/// Parse an ISO-8601 / RFC 3339 timestamp, a naive date-time (taken as UTC) or a bare date.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

/// Translate a moment-style format (`YYYY-MM-DD HH:mm`) into a chrono one.
///
/// Text inside `[...]` is copied literally.
pub fn moment_to_chrono_format(format: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MMMM", "%B"),
        ("MMM", "%b"),
        ("MM", "%m"),
        ("M", "%m"),
        ("DD", "%d"),
        ("Do", "%d"),
        ("D", "%d"),
        ("dddd", "%A"),
        ("ddd", "%a"),
        ("HH", "%H"),
        ("H", "%H"),
        ("hh", "%I"),
        ("h", "%I"),
        ("mm", "%M"),
        ("m", "%M"),
        ("ss", "%S"),
        ("s", "%S"),
        ("SSS", "%3f"),
        ("A", "%p"),
        ("a", "%p"),
        ("ZZ", "%z"),
        ("Z", "%:z"),
        ("X", "%s"),
    ];

    let mut out = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'scan: while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(close) = rest.find(']') {
                out.push_str(&rest[1..close].replace('%', "%%"));
                rest = &rest[close + 1..];
                continue;
            }
        }
        for (token, chrono_fmt) in TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(chrono_fmt);
                rest = after;
                continue 'scan;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Parse `s` against a moment-style format.
///
/// Formats carrying an offset are converted to UTC; formats without one are
/// read as UTC; a time-only format is placed on today's date.
pub fn parse_time_with_format(s: &str, format: &str) -> Option<DateTime<Utc>> {
    let fmt = moment_to_chrono_format(format);
    if let Ok(t) = DateTime::parse_from_str(s, &fmt) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, &fmt) {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, &fmt) {
        return Some(date.and_time(NaiveTime::MIN).and_utc());
    }
    NaiveTime::parse_from_str(s, &fmt)
        .ok()
        .map(|time| Utc::now().date_naive().and_time(time).and_utc())
}

/// Build an instant from `[year, month, day, hour, minute, second, millisecond]`.
///
/// The month is zero-based. Missing trailing components default to the
/// start of their range. Out-of-range components yield `None`.
pub fn time_from_components(parts: &[f64]) -> Option<DateTime<Utc>> {
    if parts.is_empty()
        || parts.len() > 7
        || parts.iter().any(|p| !p.is_finite() || p.fract() != 0.0)
    {
        return None;
    }
    // Components beyond u32 range can never form a valid date.
    let at = |i: usize, default: f64| -> Option<i64> {
        let v = parts.get(i).copied().unwrap_or(default);
        (v.abs() <= u32::MAX as f64).then_some(v as i64)
    };
    let year = i32::try_from(at(0, 1970.0)?).ok()?;
    let month = u32::try_from(at(1, 0.0)?.checked_add(1)?).ok()?;
    let day = u32::try_from(at(2, 1.0)?).ok()?;
    let hour = u32::try_from(at(3, 0.0)?).ok()?;
    let minute = u32::try_from(at(4, 0.0)?).ok()?;
    let second = u32::try_from(at(5, 0.0)?).ok()?;
    let milli = u32::try_from(at(6, 0.0)?).ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_milli_opt(hour, minute, second, milli)
        .map(|naive| naive.and_utc())
}

/// Milliseconds in one named unit, or `None` for an unknown unit.
///
/// Accepts singular, plural and short names. `M` is months and `m` minutes.
pub fn duration_unit_ms(unit: &str) -> Option<i64> {
    let ms = match unit {
        "ms" | "millisecond" | "milliseconds" => 1,
        "s" | "second" | "seconds" => SECOND_MS,
        "m" | "minute" | "minutes" => MINUTE_MS,
        "h" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "week" | "weeks" => WEEK_MS,
        "M" | "month" | "months" => MONTH_MS,
        "y" | "year" | "years" => YEAR_MS,
        _ => return None,
    };
    Some(ms)
}

/// Parse an ISO-8601 duration (`P1DT2H30M`) or a clock span (`1.02:03:04.500`).
pub fn parse_iso_duration(s: &str) -> Option<chrono::Duration> {
    let s = s.trim();
    if let Some(caps) = ISO_DURATION.captures(s) {
        let units = [YEAR_MS, MONTH_MS, WEEK_MS, DAY_MS, HOUR_MS, MINUTE_MS, SECOND_MS];
        let mut total = 0.0;
        let mut any = false;
        for (i, unit) in units.iter().enumerate() {
            if let Some(m) = caps.get(i + 2) {
                total += m.as_str().parse::<f64>().ok()? * *unit as f64;
                any = true;
            }
        }
        if !any {
            return None;
        }
        let sign = if caps.get(1).is_some_and(|m| m.as_str() == "-") { -1.0 } else { 1.0 };
        return duration_from_ms(sign * total);
    }

    let caps = CLOCK_DURATION.captures(s)?;
    let scaled = |i: usize, unit: i64| -> Option<i64> {
        match caps.get(i) {
            Some(m) => m.as_str().parse::<i64>().ok()?.checked_mul(unit),
            None => Some(0),
        }
    };
    let millis = match caps.get(6) {
        Some(m) => {
            let digits = m.as_str();
            digits.parse::<i64>().ok()? * 10i64.pow(3 - digits.len() as u32)
        }
        None => 0,
    };
    let total = scaled(2, DAY_MS)?
        .checked_add(scaled(3, HOUR_MS)?)?
        .checked_add(scaled(4, MINUTE_MS)?)?
        .checked_add(scaled(5, SECOND_MS)?)?
        .checked_add(millis)?;
    let sign = if caps.get(1).is_some_and(|m| m.as_str() == "-") { -1 } else { 1 };
    chrono::Duration::try_milliseconds(sign * total)
}

/// Format a duration as ISO-8601 (`P1DT2H3M4.5S`, `P0D` for zero).
pub fn format_iso_duration(d: chrono::Duration) -> String {
    let total = d.num_milliseconds();
    if total == 0 {
        return "P0D".into();
    }
    let (sign, mut rest) = if total < 0 { ("-", total.unsigned_abs()) } else { ("", total as u64) };
    let days = rest / DAY_MS as u64;
    rest %= DAY_MS as u64;
    let hours = rest / HOUR_MS as u64;
    rest %= HOUR_MS as u64;
    let minutes = rest / MINUTE_MS as u64;
    rest %= MINUTE_MS as u64;
    let seconds = rest as f64 / 1000.0;

    let mut out = format!("{sign}P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours > 0 || minutes > 0 || rest > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if rest > 0 {
            out.push_str(&format!("{}S", format_number(seconds)));
        }
    }
    out
}

fn human_unit_ms(unit: &str) -> Option<i64> {
    let ms = match unit.to_ascii_lowercase().as_str() {
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND_MS,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE_MS,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "wk" | "wks" | "week" | "weeks" => WEEK_MS,
        "mo" | "month" | "months" => MONTH_MS,
        "y" | "yr" | "yrs" | "year" | "years" => YEAR_MS,
        _ => return None,
    };
    Some(ms)
}

/// Parse a human phrase such as `"1h 30m"` or `"2 days and 4 hours"` into milliseconds.
///
/// A bare number is taken as milliseconds. A leading `-` negates the whole
/// phrase. Returns `None` for an empty phrase, an unknown unit, or stray text.
pub fn parse_human_duration(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest.trim_start()),
        None => (1.0, trimmed),
    };
    if body.is_empty() {
        return None;
    }
    let bare = parse_number(body);
    if bare.is_finite() && body.chars().any(|c| c.is_ascii_digit()) {
        return Some(sign * bare);
    }

    let mut total = 0.0;
    let mut last_end = 0;
    let mut matched = false;
    for caps in HUMAN_TOKEN.captures_iter(body) {
        let whole = caps.get(0)?;
        if !HUMAN_SEPARATOR.is_match(&body[last_end..whole.start()]) {
            return None;
        }
        let amount: f64 = caps[1].parse().ok()?;
        total += amount * human_unit_ms(&caps[2])? as f64;
        last_end = whole.end();
        matched = true;
    }
    if !matched || !HUMAN_SEPARATOR.is_match(&body[last_end..]) {
        return None;
    }
    Some(sign * total)
}

/// Render milliseconds as a human phrase, e.g. `"1d 2h 30m 5s 10ms"`.
///
/// Zero renders as `"0ms"`; negative spans get a leading `-`. Non-finite
/// input renders as an empty string.
pub fn to_human_duration(ms: f64) -> String {
    if !ms.is_finite() {
        return String::new();
    }
    let total = ms.round();
    if total == 0.0 {
        return "0ms".into();
    }
    let mut rest = total.abs();
    let mut parts = Vec::new();
    let units = [(DAY_MS, "d"), (HOUR_MS, "h"), (MINUTE_MS, "m"), (SECOND_MS, "s"), (1, "ms")];
    for (unit, name) in units {
        let count = (rest / unit as f64).floor();
        if count > 0.0 {
            parts.push(format!("{}{name}", format_number(count)));
            rest -= count * unit as f64;
        }
    }
    let phrase = parts.join(" ");
    if total < 0.0 {
        format!("-{phrase}")
    } else {
        phrase
    }
}

/// Time elapsed from `t` to `now`; positive when `t` is in the past.
pub fn since_at(t: DateTime<Utc>, now: DateTime<Utc>) -> chrono::Duration {
    now.signed_duration_since(t)
}

/// Time remaining from `now` to `t`; positive when `t` is in the future.
pub fn until_at(t: DateTime<Utc>, now: DateTime<Utc>) -> chrono::Duration {
    t.signed_duration_since(now)
}
