use chrono::NaiveDate;

use crate::model::*;
use crate::tz;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Availability check: the candidate, viewed on the resource's local wall
/// clock, must start and end on the same local date, inside that date's
/// single active window. Touching the window boundary from outside is a
/// conflict, not a partial success. Returns the local date for error
/// reporting downstream.
pub(crate) fn check_window(rs: &ResourceState, span: &Span) -> Result<NaiveDate, EngineError> {
    let (start_date, start_time) = tz::to_local(span.start, rs.tz);
    let (end_date, end_time) = tz::to_local(span.end, rs.tz);
    let day = tz::local_day_of_week(span.start, rs.tz);

    let window = rs
        .window_for_day(day)
        .filter(|w| w.active)
        .ok_or(EngineError::OutsideAvailability { date: start_date })?;

    // end_time == window.end_time is fine: spans are half-open.
    if end_date != start_date
        || start_time < window.start_time
        || end_time > window.end_time
    {
        return Err(EngineError::OutsideAvailability { date: start_date });
    }
    Ok(start_date)
}

/// Overlap check, exclusive resources only: half-open interval overlap
/// against every non-cancelled committed occurrence. Shared resources admit
/// overlapping occurrences — capacity limits attendees instead.
pub(crate) fn check_overlap(
    rs: &ResourceState,
    span: &Span,
    date: NaiveDate,
) -> Result<(), EngineError> {
    if rs.kind != ResourceKind::Exclusive {
        return Ok(());
    }
    for occ in rs.overlapping(span) {
        if !occ.cancelled {
            return Err(EngineError::Overlap {
                date,
                existing: occ.id,
            });
        }
    }
    Ok(())
}

/// Both required checks for one candidate, in order.
pub(crate) fn check_candidate(rs: &ResourceState, span: &Span) -> Result<NaiveDate, EngineError> {
    let date = check_window(rs, span)?;
    check_overlap(rs, span, date)?;
    Ok(date)
}
