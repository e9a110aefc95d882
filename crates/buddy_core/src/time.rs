//! Local-day arithmetic at a fixed UTC offset.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

fn offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Local calendar date of `ts`.
pub fn local_date(ts: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    ts.with_timezone(&offset(utc_offset_minutes)).date_naive()
}

pub fn today(utc_offset_minutes: i32) -> NaiveDate {
    local_date(Utc::now(), utc_offset_minutes)
}

/// Half-open UTC range `[start, end)` covering the local day `date`.
pub fn day_bounds(date: NaiveDate, utc_offset_minutes: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = date.and_time(NaiveTime::MIN);
    let start = offset(utc_offset_minutes)
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));
    (start, start + Duration::days(1))
}

/// The `days` most recent local dates ending at `today`, oldest first.
pub fn lookback_window(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64)
        .rev()
        .map(|back| today - Duration::days(back))
        .collect()
}
