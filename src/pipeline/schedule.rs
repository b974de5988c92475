use chrono::{NaiveDate, NaiveDateTime, Timelike};

/// The portal is assumed unreliable before this local hour; same-day runs
/// wait for it.
pub const RUN_WINDOW_START_HOUR: u32 = 7;

/// Whether an ingestion run may start. Historical (and otherwise
/// non-current) dates are always allowed; a run for today's date is
/// limited to the 07:00-24:00 local window. Pure function of two
/// timestamps, no I/O.
#[inline]
pub fn may_run(target_date: NaiveDate, now: NaiveDateTime) -> bool {
    if target_date != now.date() {
        return true;
    }
    now.hour() >= RUN_WINDOW_START_HOUR
}
