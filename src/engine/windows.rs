//! Weekly availability windows: at most one per (resource, day), canonical
//! day domain 1 = Monday .. 7 = Sunday.

use chrono::NaiveTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Fold both day numbering conventions seen at the boundary into the
/// canonical domain. `0` (Sunday-first numbering) becomes `7`; `1..=7` pass
/// through, so the function is idempotent: `normalize_day(normalize_day(x))
/// == normalize_day(x)`.
pub fn normalize_day(raw: i64) -> Result<u8, EngineError> {
    match raw {
        0 => Ok(7),
        1..=7 => Ok(raw as u8),
        _ => Err(EngineError::Validation("day of week out of range")),
    }
}

/// One entry of a bulk window replacement, pre-normalization.
#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub id: Option<Ulid>,
    pub day: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
}

fn validate_times(day: u8, start: NaiveTime, end: NaiveTime) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::InvalidWindow { day });
    }
    Ok(())
}

impl Engine {
    /// Create a window for a day that has none. The explicit-update path is
    /// [`Engine::update_window`]; using the create path against an occupied
    /// day fails with `AlreadyExists` naming the occupant.
    pub async fn create_window(
        &self,
        id: Ulid,
        resource_id: Ulid,
        day_raw: i64,
        start_time: NaiveTime,
        end_time: NaiveTime,
        active: bool,
    ) -> Result<(), EngineError> {
        let day = normalize_day(day_raw)?;
        validate_times(day, start_time, end_time)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if let Some(existing) = guard.window_for_day(day) {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let event = Event::WindowUpserted {
            id,
            resource_id,
            day,
            start_time,
            end_time,
            active,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await
    }

    /// Replace an existing window in place (same day slot, same id).
    pub async fn update_window(
        &self,
        id: Ulid,
        start_time: NaiveTime,
        end_time: NaiveTime,
        active: bool,
    ) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let day = guard
            .windows
            .iter()
            .flatten()
            .find(|w| w.id == id)
            .map(|w| w.day)
            .ok_or(EngineError::NotFound(id))?;
        validate_times(day, start_time, end_time)?;

        let event = Event::WindowUpserted {
            id,
            resource_id,
            day,
            start_time,
            end_time,
            active,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Atomically replace all seven day slots. Every entry is validated
    /// before anything is written; on any failure no existing window is
    /// touched. Days absent from `specs` end up empty. Returns the ids of
    /// the new windows in input order.
    pub async fn replace_windows(
        &self,
        resource_id: Ulid,
        specs: Vec<WindowSpec>,
    ) -> Result<Vec<Ulid>, EngineError> {
        if specs.len() > 7 {
            return Err(EngineError::Validation("more than seven window entries"));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;

        let mut seen = [false; 7];
        let mut windows = Vec::with_capacity(specs.len());
        for spec in &specs {
            let day = normalize_day(spec.day)?;
            validate_times(day, spec.start_time, spec.end_time)?;
            if seen[(day - 1) as usize] {
                return Err(EngineError::Validation("duplicate day in window set"));
            }
            seen[(day - 1) as usize] = true;
            windows.push(WeeklyWindow {
                id: spec.id.unwrap_or_else(Ulid::new),
                day,
                start_time: spec.start_time,
                end_time: spec.end_time,
                active: spec.active,
            });
        }
        let ids: Vec<Ulid> = windows.iter().map(|w| w.id).collect();

        let mut guard = rs.write().await;
        let event = Event::WindowsReplaced {
            resource_id,
            windows,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(ids)
    }

    pub async fn remove_window(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::WindowRemoved { id, resource_id };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Active windows only — the set the ConflictDetector consults.
    pub async fn list_active_windows(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<WindowInfo>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .windows
            .iter()
            .flatten()
            .filter(|w| w.active)
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
}

// Keep the name-length check close to where resources are created.
pub(super) fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}
