//! Fixed local civil time (UTC+09:00, no DST) used for snapshot stamps and
//! the daily timetable.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::time::SystemTime;

pub const LOCAL_OFFSET_SECS: i32 = 9 * 3600;

/// Snapshot timestamp layout, e.g. `2024-01-01 04:00:12`.
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(LOCAL_OFFSET_SECS).expect("offset within ±24h")
}

pub fn now_local() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&local_offset())
}

pub fn format_stamp(ts: &DateTime<FixedOffset>) -> String {
    ts.format(STAMP_FORMAT).to_string()
}

/// Format a filesystem mtime in local civil time.
pub fn stamp_from_system_time(t: SystemTime) -> String {
    let utc: DateTime<Utc> = t.into();
    format_stamp(&local_offset().from_utc_datetime(&utc.naive_utc()))
}
