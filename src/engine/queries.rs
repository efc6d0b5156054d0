//! Read-side queries. All locks here are read locks; status is derived from
//! the clock at read time, never stored.

use ulid::Ulid;

use crate::limits::{MAX_QUERY_WINDOW_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;

use super::conflict::now_ms;
use super::slots::free_slots;
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let arcs: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for rs_arc in arcs {
            let rs = rs_arc.read().await;
            out.push(ResourceInfo {
                id: rs.id,
                name: rs.name.clone(),
                kind: rs.kind,
                tz: rs.tz,
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_windows(&self, resource_id: Ulid) -> Result<Vec<WindowInfo>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .windows
            .iter()
            .flatten()
            .map(|w| WindowInfo {
                id: w.id,
                resource_id,
                day: w.day,
                start_time: w.start_time,
                end_time: w.end_time,
                active: w.active,
            })
            .collect())
    }

    /// All occurrences, cancelled included, sorted by start. Status is
    /// computed against the current clock.
    pub async fn get_occurrences(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<OccurrenceInfo>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let now = now_ms();
        Ok(guard
            .occurrences
            .iter()
            .map(|o| OccurrenceInfo {
                id: o.id,
                resource_id,
                start: o.span.start,
                end: o.span.end,
                capacity: o.capacity,
                attendee_count: o.attendees.len(),
                status: o.status(now),
                label: o.label.clone(),
            })
            .collect())
    }

    /// Free spans for a resource over `[start, end)`, optionally dropping
    /// fragments shorter than `min_duration_ms`.
    pub async fn compute_availability(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if start >= end {
            return Err(EngineError::Validation("start must be before end"));
        }
        if start < MIN_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        if end - start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let mut free = free_slots(&guard, &Span::new(start, end))?;
        if let Some(min) = min_duration_ms.filter(|m| *m > 0) {
            free.retain(|s| s.duration_ms() >= min);
        }
        Ok(free)
    }
}
