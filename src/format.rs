use chrono::{DateTime, Local, Utc};

const START_TS_FORMAT: &str = "%m-%d-%YT%H:%M:%S%.3f%z";

/// Human readable duration of a microsecond value: `"500μ"`, `"1.500ms"`, `"2.500s"`.
/// Zero renders as an empty string.
pub fn mk_duration_str(duration: i64) -> String {
    if duration == 0 {
        String::new()
    } else if duration.saturating_abs() < 1_000 {
        format!("{}μ", duration)
    } else if duration.saturating_abs() < 1_000_000 {
        format!("{:.3}ms", duration as f64 / 1_000.0)
    } else {
        format!("{:.3}s", duration as f64 / 1_000_000.0)
    }
}

/// Formats an epoch-microsecond timestamp as `MM-DD-YYYYTHH:mm:ss.SSS+ZZZZ`.
pub fn format_start_ts(timestamp: i64, utc: bool) -> String {
    let secs = timestamp.div_euclid(1_000_000);
    let nanos = (timestamp.rem_euclid(1_000_000) * 1_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(t) if utc => t.format(START_TS_FORMAT).to_string(),
        Some(t) => t.with_timezone(&Local).format(START_TS_FORMAT).to_string(),
        None => String::new(),
    }
}
