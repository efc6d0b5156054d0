use crate::limits::MAX_ATTENDEES_PER_OCCURRENCE;
use crate::model::Occurrence;

use super::EngineError;

/// One more attendee must fit. `capacity` of `None` is unbounded (still
/// subject to the hard attendee limit).
pub(crate) fn can_add(occ: &Occurrence) -> Result<(), EngineError> {
    if occ.attendees.len() >= MAX_ATTENDEES_PER_OCCURRENCE {
        return Err(EngineError::LimitExceeded("too many attendees"));
    }
    match occ.capacity {
        Some(cap) if occ.attendees.len() as u64 + 1 > cap as u64 => {
            Err(EngineError::CapacityFull(occ.id))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use ulid::Ulid;

    fn occ(capacity: Option<u32>, attendees: usize) -> Occurrence {
        Occurrence {
            id: Ulid::new(),
            span: Span::new(0, 1000),
            capacity,
            attendees: (0..attendees).map(|_| Ulid::new()).collect(),
            label: None,
            series_id: None,
            local_date: None,
            cancelled: false,
        }
    }

    #[test]
    fn unbounded_always_fits() {
        assert!(can_add(&occ(None, 500)).is_ok());
    }

    #[test]
    fn below_capacity_fits() {
        assert!(can_add(&occ(Some(3), 2)).is_ok());
    }

    #[test]
    fn at_capacity_rejected() {
        assert!(matches!(
            can_add(&occ(Some(3), 3)),
            Err(EngineError::CapacityFull(_))
        ));
    }

    #[test]
    fn zero_capacity_rejects_first() {
        assert!(matches!(
            can_add(&occ(Some(0), 0)),
            Err(EngineError::CapacityFull(_))
        ));
    }
}
