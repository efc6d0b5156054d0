//! Mutations: resource lifecycle, single and series bookings, cancellation,
//! attendees, and WAL compaction.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::recurrence::SeriesPattern;
use crate::tz;

use super::conflict::{check_candidate, validate_span};
use super::windows::validate_name;
use super::{Engine, EngineError, WalCommand, capacity};

/// Deterministic occurrence identity for series slots: FNV-1a 128 over
/// `(resource_id, series_id, local_date)`, folded into a Ulid. A retry of
/// the same series against the same resource derives the same ids, which is
/// what makes retry idempotent instead of duplicating.
pub(super) fn derived_occurrence_id(
    resource_id: Ulid,
    series_id: Ulid,
    date: NaiveDate,
) -> Ulid {
    const OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
    const PRIME: u128 = 0x0000000001000000000000000000013b;

    let mut hash = OFFSET_BASIS;
    let mut eat = |bytes: &[u8]| {
        for &b in bytes {
            hash ^= b as u128;
            hash = hash.wrapping_mul(PRIME);
        }
    };
    eat(&resource_id.to_bytes());
    eat(&series_id.to_bytes());
    eat(&date.to_string().as_bytes());
    Ulid::from(hash)
}

fn validate_label(label: &Option<String>) -> Result<(), EngineError> {
    if let Some(l) = label
        && l.len() > MAX_LABEL_LEN
    {
        return Err(EngineError::LimitExceeded("label too long"));
    }
    Ok(())
}

impl Engine {
    // ── Resource lifecycle ───────────────────────────────

    pub async fn create_resource(
        &self,
        id: Ulid,
        name: Option<String>,
        kind: ResourceKind,
        tz: chrono_tz::Tz,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
            kind,
            tz,
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name, kind, tz);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::ResourceUpdated { id, name };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Remove a resource and everything hanging off it. Holding the write
    /// lock through the map removal keeps a concurrent booking from landing
    /// on a half-deleted resource.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = rs.write().await;
        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.entity_to_resource.retain(|_, v| *v != id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Booking ──────────────────────────────────────────

    /// Book one ad-hoc occurrence. The span is UTC; availability is judged
    /// on the resource's local wall clock.
    pub async fn book_single(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        capacity: Option<u32>,
        label: Option<String>,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        validate_label(&label)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.occurrence(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.occurrences.len() >= MAX_OCCURRENCES_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many occurrences"));
        }
        let date = check_candidate(&guard, &span)?;

        let event = Event::OccurrenceBooked {
            id,
            resource_id,
            span,
            capacity,
            label,
            series_id: None,
            local_date: Some(date),
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await
    }

    /// Book every occurrence of a weekly series, atomically: all candidates
    /// are expanded, localized and checked before the first event is
    /// written, so one bad candidate aborts the whole batch with nothing
    /// committed. A full retry of an already-committed series with the same
    /// times and capacity returns the same ids and books nothing; a reshaped
    /// resubmission or a partial match means a different series collided
    /// with this one's identity and is rejected.
    pub async fn book_series(
        &self,
        series_id: Ulid,
        resource_id: Ulid,
        pattern: SeriesPattern,
        capacity: Option<u32>,
        label: Option<String>,
    ) -> Result<Vec<Ulid>, EngineError> {
        if pattern.start_time >= pattern.end_time {
            return Err(EngineError::Validation("start_time must be before end_time"));
        }
        validate_label(&label)?;
        let count = pattern.occurrence_count();
        if count > MAX_SERIES_OCCURRENCES {
            return Err(EngineError::RangeTooLarge {
                count,
                max: MAX_SERIES_OCCURRENCES,
            });
        }
        let candidates = pattern.expand();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;

        let ids: Vec<Ulid> = candidates
            .iter()
            .map(|c| derived_occurrence_id(resource_id, series_id, c.date))
            .collect();

        // Localize every candidate up front — the retry comparison and the
        // conflict checks both work on UTC spans.
        let mut spans: Vec<Span> = Vec::with_capacity(candidates.len());
        for c in &candidates {
            let start = tz::to_instant(guard.tz, c.date, c.start_time)
                .map_err(|_| EngineError::OutsideAvailability { date: c.date })?;
            let end = tz::to_instant(guard.tz, c.date, c.end_time)
                .map_err(|_| EngineError::OutsideAvailability { date: c.date })?;
            if start >= end {
                return Err(EngineError::OutsideAvailability { date: c.date });
            }
            spans.push(Span::new(start, end));
        }

        // Idempotent retry: the full series already committed is a success
        // that books nothing — but only when every committed occurrence
        // still has the resubmitted span and capacity. A reused series id
        // with different times, like a partial hit, is identity collision.
        let existing = ids.iter().filter(|id| guard.occurrence(**id).is_some()).count();
        if existing == ids.len() {
            let same_shape = ids.iter().zip(&spans).all(|(id, span)| {
                guard
                    .occurrence(*id)
                    .is_some_and(|occ| occ.span == *span && occ.capacity == capacity)
            });
            if !same_shape {
                return Err(EngineError::AlreadyExists(series_id));
            }
            return Ok(ids);
        }
        if existing > 0 {
            return Err(EngineError::AlreadyExists(series_id));
        }
        if guard.occurrences.len() + ids.len() > MAX_OCCURRENCES_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many occurrences"));
        }

        // Phase 1: validate every candidate — against committed state AND
        // against the earlier candidates of this same batch.
        for (i, (c, span)) in candidates.iter().zip(&spans).enumerate() {
            validate_span(span)?;
            check_candidate(&guard, span)?;
            if guard.kind == ResourceKind::Exclusive
                && let Some(j) = spans[..i].iter().position(|s| s.overlaps(span))
            {
                return Err(EngineError::Overlap {
                    date: c.date,
                    existing: derived_occurrence_id(resource_id, series_id, candidates[j].date),
                });
            }
        }

        // Phase 2: the whole series goes to the WAL as one all-or-nothing
        // append. Nothing is applied or acknowledged unless every record is
        // durable, so a write failure mid-series cannot leave a partial
        // series behind — the retry starts from a clean slate.
        let events: Vec<Event> = ids
            .iter()
            .zip(&candidates)
            .zip(&spans)
            .map(|((id, c), span)| Event::OccurrenceBooked {
                id: *id,
                resource_id,
                span: *span,
                capacity,
                label: label.clone(),
                series_id: Some(series_id),
                local_date: Some(c.date),
            })
            .collect();
        self.wal_append_all(events.clone()).await?;
        for event in &events {
            super::apply_to_resource(&mut guard, event, &self.entity_to_resource);
            self.notify.send(resource_id, event);
        }
        Ok(ids)
    }

    /// Cancel an occurrence. Cancelling an already-cancelled occurrence is a
    /// no-op success; the record itself stays so the series identity holds.
    pub async fn cancel_occurrence(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let occ = guard.occurrence(id).ok_or(EngineError::NotFound(id))?;
        if occ.cancelled {
            return Ok(resource_id);
        }
        let event = Event::OccurrenceCancelled { id, resource_id };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    // ── Attendees ────────────────────────────────────────

    /// Add an attendee, subject to the capacity guard. Re-adding a member is
    /// a no-op success.
    pub async fn add_attendee(
        &self,
        occurrence_id: Ulid,
        attendee_id: Ulid,
    ) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&occurrence_id).await?;
        let occ = guard
            .occurrence(occurrence_id)
            .ok_or(EngineError::NotFound(occurrence_id))?;
        if occ.cancelled {
            return Err(EngineError::Validation("occurrence is cancelled"));
        }
        if occ.attendees.contains(&attendee_id) {
            return Ok(resource_id);
        }
        capacity::can_add(occ)?;

        let event = Event::AttendeeAdded {
            occurrence_id,
            resource_id,
            attendee_id,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Remove an attendee. Removing a non-member is a no-op success.
    pub async fn remove_attendee(
        &self,
        occurrence_id: Ulid,
        attendee_id: Ulid,
    ) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&occurrence_id).await?;
        let occ = guard
            .occurrence(occurrence_id)
            .ok_or(EngineError::NotFound(occurrence_id))?;
        if !occ.attendees.contains(&attendee_id) {
            return Ok(resource_id);
        }

        let event = Event::AttendeeRemoved {
            occurrence_id,
            resource_id,
            attendee_id,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL as a minimal snapshot of live state. Cancelled
    /// occurrences are re-emitted as booked-then-cancelled so replay
    /// reconstructs their identity (a cancelled series slot must keep
    /// blocking an identity-colliding retry from double-booking).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for rs_arc in resources {
            let rs = rs_arc.read().await;
            events.push(Event::ResourceCreated {
                id: rs.id,
                name: rs.name.clone(),
                kind: rs.kind,
                tz: rs.tz,
            });
            let windows: Vec<WeeklyWindow> = rs.windows.iter().flatten().cloned().collect();
            if !windows.is_empty() {
                events.push(Event::WindowsReplaced {
                    resource_id: rs.id,
                    windows,
                });
            }
            for occ in &rs.occurrences {
                events.push(Event::OccurrenceBooked {
                    id: occ.id,
                    resource_id: rs.id,
                    span: occ.span,
                    capacity: occ.capacity,
                    label: occ.label.clone(),
                    series_id: occ.series_id,
                    local_date: occ.local_date,
                });
                if occ.cancelled {
                    events.push(Event::OccurrenceCancelled {
                        id: occ.id,
                        resource_id: rs.id,
                    });
                }
                for attendee in &occ.attendees {
                    events.push(Event::AttendeeAdded {
                        occurrence_id: occ.id,
                        resource_id: rs.id,
                        attendee_id: *attendee,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
