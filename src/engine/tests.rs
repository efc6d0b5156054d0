use super::*;
use crate::limits::*;
use crate::recurrence::SeriesPattern;

use chrono::{NaiveDate, NaiveTime};

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn utc_ms(y: i32, m: u32, day: u32, h: u32, min: u32) -> Ms {
    d(y, m, day)
        .and_hms_opt(h, min, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

/// UTC resource with a Monday 09:00–17:00 window.
async fn monday_resource(engine: &Engine, kind: ResourceKind) -> Ulid {
    let id = Ulid::new();
    engine
        .create_resource(id, Some("court 1".into()), kind, chrono_tz::UTC)
        .await
        .unwrap();
    engine
        .create_window(Ulid::new(), id, 1, t(9, 0), t(17, 0), true)
        .await
        .unwrap();
    id
}

// ── Resources ────────────────────────────────────────────

#[tokio::test]
async fn engine_create_and_query_resource() {
    let engine = test_engine("create_resource.wal");

    let id = Ulid::new();
    engine
        .create_resource(id, Some("chair 1".into()), ResourceKind::Exclusive, chrono_tz::UTC)
        .await
        .unwrap();

    let rs = engine.get_resource(&id).unwrap();
    let guard = rs.read().await;
    assert_eq!(guard.name.as_deref(), Some("chair 1"));
    assert_eq!(guard.kind, ResourceKind::Exclusive);
}

#[tokio::test]
async fn engine_duplicate_resource_rejected() {
    let engine = test_engine("dup_resource.wal");

    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, chrono_tz::UTC)
        .await
        .unwrap();
    let result = engine
        .create_resource(id, None, ResourceKind::Exclusive, chrono_tz::UTC)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_update_and_delete_resource() {
    let engine = test_engine("update_delete_resource.wal");

    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, chrono_tz::UTC)
        .await
        .unwrap();
    engine.update_resource(id, Some("renamed".into())).await.unwrap();
    {
        let rs = engine.get_resource(&id).unwrap();
        assert_eq!(rs.read().await.name.as_deref(), Some("renamed"));
    }

    engine.delete_resource(id).await.unwrap();
    assert!(engine.get_resource(&id).is_none());
    assert!(matches!(
        engine.update_resource(id, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Windows ──────────────────────────────────────────────

#[tokio::test]
async fn engine_create_window_occupied_day_rejected() {
    let engine = test_engine("window_occupied.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let result = engine
        .create_window(Ulid::new(), id, 1, t(8, 0), t(12, 0), true)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_window_inverted_times_rejected() {
    let engine = test_engine("window_inverted.wal");
    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, chrono_tz::UTC)
        .await
        .unwrap();

    let result = engine
        .create_window(Ulid::new(), id, 2, t(17, 0), t(9, 0), true)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidWindow { day: 2 })));
}

#[tokio::test]
async fn engine_update_window_in_place() {
    let engine = test_engine("window_update.wal");
    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, chrono_tz::UTC)
        .await
        .unwrap();
    let wid = Ulid::new();
    engine
        .create_window(wid, id, 3, t(9, 0), t(12, 0), true)
        .await
        .unwrap();

    engine.update_window(wid, t(10, 0), t(14, 0), false).await.unwrap();

    let windows = engine.get_windows(id).await.unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].id, wid);
    assert_eq!(windows[0].start_time, t(10, 0));
    assert!(!windows[0].active);
    assert!(engine.list_active_windows(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn engine_replace_windows_is_atomic() {
    let engine = test_engine("windows_replace.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let spec = |day, s, e| WindowSpec {
        id: None,
        day,
        start_time: t(s, 0),
        end_time: t(e, 0),
        active: true,
    };

    // One bad entry: nothing changes.
    let result = engine
        .replace_windows(id, vec![spec(2, 9, 12), spec(3, 14, 10)])
        .await;
    assert!(matches!(result, Err(EngineError::InvalidWindow { day: 3 })));
    let windows = engine.get_windows(id).await.unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].day, 1);

    // Duplicate day rejected even across numbering conventions (0 == 7).
    let result = engine
        .replace_windows(id, vec![spec(0, 9, 12), spec(7, 14, 16)])
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // Good set: Monday slot is gone, replaced by Tue/Wed.
    engine
        .replace_windows(id, vec![spec(2, 9, 12), spec(3, 13, 17)])
        .await
        .unwrap();
    let mut days: Vec<u8> = engine
        .get_windows(id)
        .await
        .unwrap()
        .iter()
        .map(|w| w.day)
        .collect();
    days.sort();
    assert_eq!(days, vec![2, 3]);
}

#[tokio::test]
async fn engine_remove_window() {
    let engine = test_engine("window_remove.wal");
    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, chrono_tz::UTC)
        .await
        .unwrap();
    let wid = Ulid::new();
    engine
        .create_window(wid, id, 5, t(9, 0), t(12, 0), true)
        .await
        .unwrap();

    engine.remove_window(wid).await.unwrap();
    assert!(engine.get_windows(id).await.unwrap().is_empty());
    assert!(matches!(
        engine.remove_window(wid).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Single bookings ──────────────────────────────────────

#[tokio::test]
async fn engine_book_inside_window() {
    let engine = test_engine("book_inside.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    // Monday 2024-03-04, 10:00–11:00 UTC.
    engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0)),
            None,
            Some("trim".into()),
        )
        .await
        .unwrap();

    let occs = engine.get_occurrences(id).await.unwrap();
    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0].label.as_deref(), Some("trim"));
}

#[tokio::test]
async fn engine_book_outside_window_rejected() {
    let engine = test_engine("book_outside.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    // Straddles the window open: 08:00–09:30 touches 09:00 but starts outside.
    let result = engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 4, 8, 0), utc_ms(2024, 3, 4, 9, 30)),
            None,
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::OutsideAvailability { date }) if date == d(2024, 3, 4)
    ));

    // Tuesday has no window at all.
    let result = engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 5, 10, 0), utc_ms(2024, 3, 5, 11, 0)),
            None,
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::OutsideAvailability { .. })));

    assert!(engine.get_occurrences(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn engine_book_to_window_edges_succeeds() {
    let engine = test_engine("book_edges.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 4, 9, 0), utc_ms(2024, 3, 4, 17, 0)),
            None,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_double_booking_rejected() {
    let engine = test_engine("double_booking.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let first = Ulid::new();
    engine
        .book_single(
            first,
            id,
            Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0)),
            None,
            None,
        )
        .await
        .unwrap();

    let result = engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 4, 10, 30), utc_ms(2024, 3, 4, 11, 30)),
            None,
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Overlap { existing, .. }) if existing == first
    ));

    // Back-to-back is fine: spans are half-open.
    engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 4, 11, 0), utc_ms(2024, 3, 4, 12, 0)),
            None,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_shared_resource_admits_overlap() {
    let engine = test_engine("shared_overlap.wal");
    let id = monday_resource(&engine, ResourceKind::Shared).await;

    let span = Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0));
    engine
        .book_single(Ulid::new(), id, span, Some(8), None)
        .await
        .unwrap();
    engine
        .book_single(Ulid::new(), id, span, Some(8), None)
        .await
        .unwrap();
    assert_eq!(engine.get_occurrences(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn engine_invalid_span_rejected() {
    let engine = test_engine("invalid_span.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let start = utc_ms(2024, 3, 4, 10, 0);
    let result = engine
        .book_single(Ulid::new(), id, Span { start, end: start }, None, None)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // Pre-epoch-range timestamps rejected.
    let result = engine
        .book_single(Ulid::new(), id, Span { start: 0, end: H }, None, None)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Series bookings ──────────────────────────────────────

fn march_mondays() -> SeriesPattern {
    SeriesPattern {
        day: 1,
        start_date: d(2024, 3, 4),
        end_date: d(2024, 3, 18),
        start_time: t(10, 0),
        end_time: t(11, 0),
    }
}

#[tokio::test]
async fn engine_series_books_every_matching_date() {
    let engine = test_engine("series_basic.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let ids = engine
        .book_series(Ulid::new(), id, march_mondays(), None, Some("standing".into()))
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);

    let occs = engine.get_occurrences(id).await.unwrap();
    assert_eq!(occs.len(), 3);
    assert_eq!(occs[0].start, utc_ms(2024, 3, 4, 10, 0));
    assert_eq!(occs[1].start, utc_ms(2024, 3, 11, 10, 0));
    assert_eq!(occs[2].start, utc_ms(2024, 3, 18, 10, 0));
}

#[tokio::test]
async fn engine_series_retry_is_idempotent() {
    let engine = test_engine("series_retry.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let series = Ulid::new();
    let first = engine
        .book_series(series, id, march_mondays(), None, None)
        .await
        .unwrap();
    let second = engine
        .book_series(series, id, march_mondays(), None, None)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.get_occurrences(id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn engine_series_partial_identity_collision_rejected() {
    let engine = test_engine("series_partial.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let series = Ulid::new();
    engine
        .book_series(series, id, march_mondays(), None, None)
        .await
        .unwrap();

    // Same series id, wider range: the original three slots already exist.
    let mut wider = march_mondays();
    wider.end_date = d(2024, 3, 25);
    let result = engine.book_series(series, id, wider, None, None).await;
    assert!(matches!(
        result,
        Err(EngineError::AlreadyExists(s)) if s == series
    ));
    assert_eq!(engine.get_occurrences(id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn engine_series_reshaped_retry_rejected() {
    let engine = test_engine("series_reshape.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let series = Ulid::new();
    engine
        .book_series(series, id, march_mondays(), None, None)
        .await
        .unwrap();

    // Same series id and dates but afternoon slots: the derived ids collide
    // with the committed mornings, so this is not a retry.
    let mut afternoon = march_mondays();
    afternoon.start_time = t(14, 0);
    afternoon.end_time = t(15, 0);
    let result = engine.book_series(series, id, afternoon, None, None).await;
    assert!(matches!(
        result,
        Err(EngineError::AlreadyExists(s)) if s == series
    ));

    // The mornings are untouched and no afternoon occurrence was booked.
    let occs = engine.get_occurrences(id).await.unwrap();
    assert_eq!(occs.len(), 3);
    assert!(occs.iter().any(|o| o.start == utc_ms(2024, 3, 4, 10, 0)));
    assert!(occs.iter().all(|o| o.start != utc_ms(2024, 3, 4, 14, 0)));
}

#[tokio::test]
async fn engine_series_capacity_change_retry_rejected() {
    let engine = test_engine("series_recap.wal");
    let id = monday_resource(&engine, ResourceKind::Shared).await;

    let series = Ulid::new();
    engine
        .book_series(series, id, march_mondays(), Some(4), None)
        .await
        .unwrap();

    let result = engine
        .book_series(series, id, march_mondays(), Some(8), None)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::AlreadyExists(s)) if s == series
    ));
    let occs = engine.get_occurrences(id).await.unwrap();
    assert!(occs.iter().all(|o| o.capacity == Some(4)));
}

#[tokio::test]
async fn engine_series_aborts_whole_batch_on_conflict() {
    let engine = test_engine("series_atomic.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    // A single booking squats on the middle Monday.
    engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 11, 10, 30), utc_ms(2024, 3, 11, 11, 30)),
            None,
            None,
        )
        .await
        .unwrap();

    let result = engine
        .book_series(Ulid::new(), id, march_mondays(), None, None)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Overlap { date, .. }) if date == d(2024, 3, 11)
    ));
    // Only the squatter remains — March 4 was NOT committed.
    assert_eq!(engine.get_occurrences(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn engine_series_empty_expansion_is_noop() {
    let engine = test_engine("series_empty.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let mut inverted = march_mondays();
    inverted.end_date = d(2024, 2, 1);
    let ids = engine
        .book_series(Ulid::new(), id, inverted, None, None)
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn engine_series_range_cap_enforced() {
    let engine = test_engine("series_cap.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let mut huge = march_mondays();
    huge.end_date = d(2030, 3, 4);
    let result = engine.book_series(Ulid::new(), id, huge, None, None).await;
    assert!(matches!(
        result,
        Err(EngineError::RangeTooLarge { max: MAX_SERIES_OCCURRENCES, .. })
    ));
}

// ── Cancellation ─────────────────────────────────────────

#[tokio::test]
async fn engine_cancel_is_idempotent_and_frees_slot() {
    let engine = test_engine("cancel.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let occ = Ulid::new();
    let span = Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0));
    engine.book_single(occ, id, span, None, None).await.unwrap();

    engine.cancel_occurrence(occ).await.unwrap();
    engine.cancel_occurrence(occ).await.unwrap(); // no-op

    let occs = engine.get_occurrences(id).await.unwrap();
    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0].status, OccurrenceStatus::Cancelled);

    // The slot opens back up for someone else.
    engine
        .book_single(Ulid::new(), id, span, None, None)
        .await
        .unwrap();
}

// ── Attendees ────────────────────────────────────────────

#[tokio::test]
async fn engine_attendees_respect_capacity() {
    let engine = test_engine("attendees.wal");
    let id = monday_resource(&engine, ResourceKind::Shared).await;

    let occ = Ulid::new();
    engine
        .book_single(
            occ,
            id,
            Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0)),
            Some(2),
            None,
        )
        .await
        .unwrap();

    let a = Ulid::new();
    let b = Ulid::new();
    engine.add_attendee(occ, a).await.unwrap();
    engine.add_attendee(occ, a).await.unwrap(); // duplicate is a no-op
    engine.add_attendee(occ, b).await.unwrap();

    let result = engine.add_attendee(occ, Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::CapacityFull(o)) if o == occ));

    let occs = engine.get_occurrences(id).await.unwrap();
    assert_eq!(occs[0].attendee_count, 2);

    // Leaving opens a seat.
    engine.remove_attendee(occ, a).await.unwrap();
    engine.remove_attendee(occ, a).await.unwrap(); // non-member, no-op
    engine.add_attendee(occ, Ulid::new()).await.unwrap();
}

#[tokio::test]
async fn engine_attendee_on_cancelled_occurrence_rejected() {
    let engine = test_engine("attendee_cancelled.wal");
    let id = monday_resource(&engine, ResourceKind::Shared).await;

    let occ = Ulid::new();
    engine
        .book_single(
            occ,
            id,
            Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0)),
            Some(5),
            None,
        )
        .await
        .unwrap();
    engine.cancel_occurrence(occ).await.unwrap();

    let result = engine.add_attendee(occ, Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

// ── Availability queries ─────────────────────────────────

#[tokio::test]
async fn engine_availability_subtracts_bookings() {
    let engine = test_engine("availability.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 3, 4, 10, 0), utc_ms(2024, 3, 4, 11, 0)),
            None,
            None,
        )
        .await
        .unwrap();

    let free = engine
        .compute_availability(id, utc_ms(2024, 3, 4, 0, 0), utc_ms(2024, 3, 5, 0, 0), None)
        .await
        .unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(utc_ms(2024, 3, 4, 9, 0), utc_ms(2024, 3, 4, 10, 0)),
            Span::new(utc_ms(2024, 3, 4, 11, 0), utc_ms(2024, 3, 4, 17, 0)),
        ]
    );

    // min_duration drops the one-hour head fragment.
    let free = engine
        .compute_availability(
            id,
            utc_ms(2024, 3, 4, 0, 0),
            utc_ms(2024, 3, 5, 0, 0),
            Some(2 * H),
        )
        .await
        .unwrap();
    assert_eq!(
        free,
        vec![Span::new(utc_ms(2024, 3, 4, 11, 0), utc_ms(2024, 3, 4, 17, 0))]
    );
}

#[tokio::test]
async fn engine_availability_query_window_capped() {
    let engine = test_engine("availability_cap.wal");
    let id = monday_resource(&engine, ResourceKind::Exclusive).await;

    let start = utc_ms(2024, 3, 4, 0, 0);
    let result = engine
        .compute_availability(id, start, start + MAX_QUERY_WINDOW_MS + M, None)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn engine_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let series = Ulid::new();
    let resource;
    let cancelled;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        resource = monday_resource(&engine, ResourceKind::Exclusive).await;
        let ids = engine
            .book_series(series, resource, march_mondays(), None, None)
            .await
            .unwrap();
        cancelled = ids[1];
        engine.cancel_occurrence(cancelled).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let occs = engine.get_occurrences(resource).await.unwrap();
    assert_eq!(occs.len(), 3);
    assert_eq!(
        occs.iter().filter(|o| o.status == OccurrenceStatus::Cancelled).count(),
        1
    );

    // Retry after restart still returns the same derived ids.
    let ids = engine
        .book_series(series, resource, march_mondays(), None, None)
        .await
        .unwrap();
    assert!(ids.contains(&cancelled));
    assert_eq!(engine.get_occurrences(resource).await.unwrap().len(), 3);
}

#[tokio::test]
async fn engine_multi_event_append_replays_as_a_unit() {
    let path = test_wal_path("multi_append.wal");
    let resource;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        resource = monday_resource(&engine, ResourceKind::Exclusive).await;

        // Several records through a single writer ack, the way a series
        // commit lands. Not applied in memory here; replay must surface all
        // of them or none.
        let events: Vec<Event> = (0..3)
            .map(|i| Event::OccurrenceBooked {
                id: Ulid::new(),
                resource_id: resource,
                span: Span::new(
                    utc_ms(2024, 3, 4, 9 + i, 0),
                    utc_ms(2024, 3, 4, 10 + i, 0),
                ),
                capacity: None,
                label: None,
                series_id: None,
                local_date: Some(d(2024, 3, 4)),
            })
            .collect();
        engine.wal_append_all(events).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_occurrences(resource).await.unwrap().len(), 3);
}

#[tokio::test]
async fn engine_compaction_preserves_state_and_identity() {
    let path = test_wal_path("compact.wal");
    let series = Ulid::new();
    let resource;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        resource = monday_resource(&engine, ResourceKind::Shared).await;
        let ids = engine
            .book_series(series, resource, march_mondays(), Some(4), None)
            .await
            .unwrap();
        engine.add_attendee(ids[0], Ulid::new()).await.unwrap();
        engine.cancel_occurrence(ids[2]).await.unwrap();

        assert!(engine.wal_appends_since_compact().await.unwrap() > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await.unwrap(), 0);
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let occs = engine.get_occurrences(resource).await.unwrap();
    assert_eq!(occs.len(), 3);
    assert_eq!(occs.iter().map(|o| o.attendee_count).sum::<usize>(), 1);
    assert_eq!(
        occs.iter().filter(|o| o.status == OccurrenceStatus::Cancelled).count(),
        1
    );
    assert_eq!(engine.get_windows(resource).await.unwrap().len(), 1);

    // The derived identity survived compaction.
    let ids = engine
        .book_series(series, resource, march_mondays(), Some(4), None)
        .await
        .unwrap();
    assert_eq!(engine.get_occurrences(resource).await.unwrap().len(), 3);
    assert_eq!(ids.len(), 3);
}

// ── Timezone semantics ───────────────────────────────────

#[tokio::test]
async fn engine_window_judged_on_local_clock() {
    let engine = test_engine("local_clock.wal");
    let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, tz)
        .await
        .unwrap();
    engine
        .create_window(Ulid::new(), id, 1, t(9, 0), t(17, 0), true)
        .await
        .unwrap();

    // Monday 2024-01-15 10:00 local = 15:00Z. The same instant misses a UTC
    // 09:00–17:00 reading by nothing, but it is the LOCAL clock that counts:
    // 20:00Z is still 15:00 local and books fine.
    engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 1, 15, 20, 0), utc_ms(2024, 1, 15, 21, 0)),
            None,
            None,
        )
        .await
        .unwrap();

    // 03:00Z Monday is Sunday 22:00 local: no window.
    let result = engine
        .book_single(
            Ulid::new(),
            id,
            Span::new(utc_ms(2024, 1, 15, 3, 0), utc_ms(2024, 1, 15, 4, 0)),
            None,
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::OutsideAvailability { .. })));
}

#[tokio::test]
async fn engine_series_tracks_dst_transition() {
    let engine = test_engine("series_dst.wal");
    let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
    let id = Ulid::new();
    engine
        .create_resource(id, None, ResourceKind::Exclusive, tz)
        .await
        .unwrap();
    engine
        .create_window(Ulid::new(), id, 1, t(9, 0), t(17, 0), true)
        .await
        .unwrap();

    // Mondays around the 2024-03-10 spring-forward: local 10:00 is 15:00Z
    // before the shift and 14:00Z after.
    let pattern = SeriesPattern {
        day: 1,
        start_date: d(2024, 3, 4),
        end_date: d(2024, 3, 11),
        start_time: t(10, 0),
        end_time: t(11, 0),
    };
    engine
        .book_series(Ulid::new(), id, pattern, None, None)
        .await
        .unwrap();

    let occs = engine.get_occurrences(id).await.unwrap();
    assert_eq!(occs.len(), 2);
    assert_eq!(occs[0].start, utc_ms(2024, 3, 4, 15, 0));
    assert_eq!(occs[1].start, utc_ms(2024, 3, 11, 14, 0));
}
