//! Run timestamp normalisation onto a fixed minute grid.
//!
//! The nominal time of a run is its wall-clock start in the deployment zone,
//! seconds stripped, snapped to the nearest grid mark. Persistence keys, file
//! names and payloads all use this value, never the capture time.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};

/// Directory-name form, e.g. `2025-06-01_10-15-00`.
pub const DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
/// Payload form, e.g. `2025-06-01 10:15:00`.
pub const PAYLOAD_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Snap a naive wall-clock time to the nearest `grid_minutes` mark.
///
/// Seconds and sub-seconds are dropped first. The floor mark wins only when it
/// is strictly closer; an exact tie goes to the ceiling. `grid_minutes` must
/// divide 60.
pub fn round_to_grid(time: NaiveDateTime, grid_minutes: u32) -> NaiveDateTime {
    let whole_minute = time - Duration::seconds(time.second() as i64)
        - Duration::nanoseconds(time.nanosecond() as i64);

    let discard = Duration::minutes((whole_minute.minute() % grid_minutes) as i64);
    let floor = whole_minute - discard;
    let ceil = floor + Duration::minutes(grid_minutes as i64);

    if whole_minute - floor < ceil - whole_minute {
        floor
    } else {
        ceil
    }
}

/// Wall-clock `now` in the deployment zone, rounded, re-attached to the zone.
pub fn normalize(now: DateTime<Utc>, offset: FixedOffset, grid_minutes: u32) -> DateTime<FixedOffset> {
    let local = now.with_timezone(&offset).naive_local();
    let rounded = round_to_grid(local, grid_minutes);
    offset.from_utc_datetime(&(rounded - offset_duration(offset)))
}

fn offset_duration(offset: FixedOffset) -> Duration {
    Duration::seconds(offset.local_minus_utc() as i64)
}
