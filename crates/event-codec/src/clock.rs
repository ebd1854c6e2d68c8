//! Wall-clock rendering of event timestamps.

use chrono::{offset::LocalResult, Local, TimeZone};
use std::fmt::Display;

/// Render an epoch-millisecond timestamp as `HH:MM:SS` in the given zone.
///
/// Timestamps outside chrono's representable range render as `00:00:00`.
pub fn format_clock_time<Tz>(timestamp_ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match tz.timestamp_millis_opt(timestamp_ms) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
            dt.format("%H:%M:%S").to_string()
        }
        LocalResult::None => "00:00:00".to_string(),
    }
}

pub fn format_local_time(timestamp_ms: i64) -> String {
    format_clock_time(timestamp_ms, &Local)
}
