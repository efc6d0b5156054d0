//! Free-slot computation: weekly windows expanded over a query range, minus
//! whatever blocks booking.

use chrono::{Datelike, Days};

use crate::model::*;
use crate::tz;

use super::EngineError;

/// Compute free spans for one resource over `query` (UTC).
///
/// Active windows are projected onto every local date the query touches and
/// merged; then blocking occurrence spans are subtracted — every
/// non-cancelled occurrence for an exclusive resource, only full ones for a
/// shared resource (an open class slot is still joinable).
pub fn free_slots(rs: &ResourceState, query: &Span) -> Result<Vec<Span>, EngineError> {
    let (mut date, _) = tz::to_local(query.start, rs.tz);
    let (end_date, _) = tz::to_local(query.end, rs.tz);

    let mut open: Vec<Span> = Vec::new();
    while date <= end_date {
        let day = date.weekday().number_from_monday() as u8;
        if let Some(w) = rs.window_for_day(day).filter(|w| w.active) {
            let start = tz::to_instant(rs.tz, date, w.start_time)
                .map_err(|_| EngineError::Validation("window falls in a DST gap"))?;
            let end = tz::to_instant(rs.tz, date, w.end_time)
                .map_err(|_| EngineError::Validation("window falls in a DST gap"))?;
            let clamped_start = start.max(query.start);
            let clamped_end = end.min(query.end);
            if clamped_start < clamped_end {
                open.push(Span::new(clamped_start, clamped_end));
            }
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(d) => d,
            None => break,
        };
    }

    open.sort_by_key(|s| s.start);
    let mut free = merge_overlapping(&open);

    let mut blocked: Vec<Span> = rs
        .overlapping(query)
        .filter(|o| !o.cancelled)
        .filter(|o| match rs.kind {
            ResourceKind::Exclusive => true,
            ResourceKind::Shared => o.is_full(),
        })
        .map(|o| o.span)
        .collect();
    blocked.sort_by_key(|s| s.start);

    if !blocked.is_empty() {
        free = subtract_intervals(&free, &blocked);
    }

    Ok(free)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
