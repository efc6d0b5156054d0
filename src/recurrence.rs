//! Weekly series expansion.
//!
//! The only recurrence shape the engine supports: one weekday, every week,
//! between two calendar dates inclusive, at a fixed local time-of-day pair.
//! Expansion is a pure function of the pattern — no iterator state, no
//! clock — so a retry recomputes the exact same candidate list.

use chrono::{Datelike, Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A validated weekly pattern. `day` is canonical (1 = Monday .. 7 = Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPattern {
    pub day: u8,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// One expanded candidate, still in resource-local wall-clock terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl SeriesPattern {
    /// All dates in `[start_date, end_date]` falling on `day`, ascending.
    /// An inverted or matchless range yields an empty vec — that is a valid
    /// (if useless) series, not an error.
    pub fn expand(&self) -> Vec<Candidate> {
        debug_assert!((1..=7).contains(&self.day));
        let mut out = Vec::new();
        if self.end_date < self.start_date {
            return out;
        }

        let start_dow = self.start_date.weekday().number_from_monday() as i64;
        let offset = (self.day as i64 - start_dow).rem_euclid(7) as u64;
        let mut date = match self.start_date.checked_add_days(Days::new(offset)) {
            Some(d) => d,
            None => return out,
        };

        while date <= self.end_date {
            out.push(Candidate {
                date,
                start_time: self.start_time,
                end_time: self.end_time,
            });
            date = match date.checked_add_days(Days::new(7)) {
                Some(d) => d,
                None => break,
            };
        }
        out
    }

    /// Number of occurrences `expand` would emit, without allocating.
    pub fn occurrence_count(&self) -> usize {
        if self.end_date < self.start_date {
            return 0;
        }
        let start_dow = self.start_date.weekday().number_from_monday() as i64;
        let offset = (self.day as i64 - start_dow).rem_euclid(7);
        let days_in_range = (self.end_date - self.start_date).num_days();
        if offset > days_in_range {
            0
        } else {
            ((days_in_range - offset) / 7 + 1) as usize
        }
    }
}
