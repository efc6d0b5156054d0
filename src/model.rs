use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds UTC — the only stored time type.
pub type Ms = i64;

/// Half-open interval `[start, end)` in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Whether a resource can host more than one occurrence at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A single barber, court or room: at most one active occurrence at any
    /// instant. Overlap is a conflict.
    Exclusive,
    /// A program or team slot: overlapping occurrences are fine; capacity
    /// limits attendees per occurrence instead.
    Shared,
}

/// A standing weekly booking permission: one day of the week, between two
/// local wall-clock times. At most one window per (resource, day).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyWindow {
    pub id: Ulid,
    /// Canonical day of week, 1 = Monday .. 7 = Sunday.
    pub day: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
}

/// One concrete, time-bounded booking against a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Ulid,
    pub span: Span,
    /// None = unbounded.
    pub capacity: Option<u32>,
    pub attendees: Vec<Ulid>,
    pub label: Option<String>,
    /// Set for occurrences produced by a series booking, together with the
    /// local date the occurrence was expanded from. The pair
    /// `(resource, series_id, local_date)` is the idempotency key.
    pub series_id: Option<Ulid>,
    pub local_date: Option<NaiveDate>,
    /// Terminal. Cancelled occurrences stay in the list so the derived
    /// identity survives, but no check counts them.
    pub cancelled: bool,
}

/// Never stored — computed from `now` at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceStatus {
    Upcoming,
    InProgress,
    Completed,
    Cancelled,
}

impl OccurrenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceStatus::Upcoming => "upcoming",
            OccurrenceStatus::InProgress => "in_progress",
            OccurrenceStatus::Completed => "completed",
            OccurrenceStatus::Cancelled => "cancelled",
        }
    }
}

impl Occurrence {
    pub fn status(&self, now: Ms) -> OccurrenceStatus {
        if self.cancelled {
            OccurrenceStatus::Cancelled
        } else if now < self.span.start {
            OccurrenceStatus::Upcoming
        } else if now < self.span.end {
            OccurrenceStatus::InProgress
        } else {
            OccurrenceStatus::Completed
        }
    }

    pub fn is_full(&self) -> bool {
        match self.capacity {
            Some(cap) => self.attendees.len() as u64 >= cap as u64,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: Option<String>,
    pub kind: ResourceKind,
    pub tz: Tz,
    /// One slot per canonical day, index = day - 1.
    pub windows: [Option<WeeklyWindow>; 7],
    /// All occurrences, sorted by `span.start`.
    pub occurrences: Vec<Occurrence>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: Option<String>, kind: ResourceKind, tz: Tz) -> Self {
        Self {
            id,
            name,
            kind,
            tz,
            windows: Default::default(),
            occurrences: Vec::new(),
        }
    }

    pub fn window_for_day(&self, day: u8) -> Option<&WeeklyWindow> {
        debug_assert!((1..=7).contains(&day));
        self.windows[(day - 1) as usize].as_ref()
    }

    /// Insert maintaining sort order by span.start. Any existing occurrence
    /// with the same id is dropped first (a re-booked series slot replaces
    /// its cancelled predecessor).
    pub fn insert_occurrence(&mut self, occ: Occurrence) {
        self.occurrences.retain(|o| o.id != occ.id);
        let pos = self
            .occurrences
            .binary_search_by_key(&occ.span.start, |o| o.span.start)
            .unwrap_or_else(|e| e);
        self.occurrences.insert(pos, occ);
    }

    pub fn occurrence(&self, id: Ulid) -> Option<&Occurrence> {
        self.occurrences.iter().find(|o| o.id == id)
    }

    pub fn occurrence_mut(&mut self, id: Ulid) -> Option<&mut Occurrence> {
        self.occurrences.iter_mut().find(|o| o.id == id)
    }

    /// Occurrences whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Occurrence> {
        let right_bound = self
            .occurrences
            .partition_point(|o| o.span.start < query.end);
        self.occurrences[..right_bound]
            .iter()
            .filter(move |o| o.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: Option<String>,
        kind: ResourceKind,
        tz: Tz,
    },
    ResourceUpdated {
        id: Ulid,
        name: Option<String>,
    },
    ResourceDeleted {
        id: Ulid,
    },
    WindowUpserted {
        id: Ulid,
        resource_id: Ulid,
        day: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
        active: bool,
    },
    /// Atomic seven-slot replacement. Days absent from `windows` are cleared.
    WindowsReplaced {
        resource_id: Ulid,
        windows: Vec<WeeklyWindow>,
    },
    WindowRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    OccurrenceBooked {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        capacity: Option<u32>,
        label: Option<String>,
        series_id: Option<Ulid>,
        local_date: Option<NaiveDate>,
    },
    OccurrenceCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
    AttendeeAdded {
        occurrence_id: Ulid,
        resource_id: Ulid,
        attendee_id: Ulid,
    },
    AttendeeRemoved {
        occurrence_id: Ulid,
        resource_id: Ulid,
        attendee_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub kind: ResourceKind,
    pub tz: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub day: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub capacity: Option<u32>,
    pub attendee_count: usize,
    pub status: OccurrenceStatus,
    pub label: Option<String>,
}
