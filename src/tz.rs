//! Local wall clock ⇄ UTC instant conversion.
//!
//! Every comparison and every stored timestamp in the engine is UTC
//! milliseconds; local dates and times exist only at the edges (weekly
//! windows, series expansion). DST edges resolve deterministically:
//!
//! - ambiguous local time (fall-back): the **earliest** instant wins;
//! - nonexistent local time (spring-forward gap): shift forward in
//!   one-minute steps to the first valid instant, capped at 3 hours.
//!
//! So a 02:30 occurrence on a spring-forward day lands at 03:00 local
//! rather than disappearing from the series.

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::Ms;

/// Largest gap we are willing to skip over, in minutes. Real-world DST gaps
/// are 30–120 minutes.
const MAX_GAP_SHIFT_MIN: i64 = 180;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TzError {
    /// Local time falls inside a DST gap wider than the shift cap.
    Unresolvable(NaiveDateTime),
}

impl std::fmt::Display for TzError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TzError::Unresolvable(naive) => {
                write!(f, "local time {naive} has no valid instant in range")
            }
        }
    }
}

impl std::error::Error for TzError {}

/// Convert a resource-local wall-clock time to a UTC instant.
pub fn to_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Result<Ms, TzError> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc).timestamp_millis()),
        LocalResult::Ambiguous(earliest, _latest) => {
            Ok(earliest.with_timezone(&Utc).timestamp_millis())
        }
        LocalResult::None => {
            let mut t = naive;
            for _ in 0..MAX_GAP_SHIFT_MIN {
                t += chrono::Duration::minutes(1);
                if let LocalResult::Single(dt) = tz.from_local_datetime(&t) {
                    return Ok(dt.with_timezone(&Utc).timestamp_millis());
                }
            }
            Err(TzError::Unresolvable(naive))
        }
    }
}

/// Convert a UTC instant back to the resource's local wall clock.
pub fn to_local(instant: Ms, tz: Tz) -> (NaiveDate, NaiveTime) {
    let dt: DateTime<Tz> = Utc
        .timestamp_millis_opt(instant)
        .single()
        .expect("instant within chrono range")
        .with_timezone(&tz);
    (dt.date_naive(), dt.time())
}

/// Canonical day of week (1 = Monday .. 7 = Sunday) of a UTC instant in the
/// resource's local timezone.
pub fn local_day_of_week(instant: Ms, tz: Tz) -> u8 {
    let (date, _) = to_local(instant, tz);
    date.weekday().number_from_monday() as u8
}
