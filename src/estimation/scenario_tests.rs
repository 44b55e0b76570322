// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// End to end: feed JSON -> normalize -> locate -> store -> diff.

use super::{LocateError, MovementState, locate};
use crate::coordinates::StaticCoordinates;
use crate::delta::ChangeDetector;
use crate::position_store::{PositionStore, StoreOptions};
use crate::schedule::normalize::normalize;
use crate::schedule::resolve::ResolveError;
use approx::assert_abs_diff_eq;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

fn coords() -> StaticCoordinates {
    let mut coords = StaticCoordinates::new();
    coords.insert("A", 52.0, -1.0);
    coords.insert("B", 52.2, -1.4);
    coords.insert("C", 51.5, -0.12);
    coords
}

fn received() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 5, 23, 0, 0).unwrap()
}

fn two_stop_message(ts: &str) -> serde_json::Value {
    let payload = json!({
        "ts": ts,
        "uR": {"TS": {"rid": "R1", "uid": "L10001", "ssd": "2025-09-05", "Location": [
            {"tpl": "A", "plat": "1", "dep": {"at": "10:00"}},
            {"tpl": "B", "plat": {"": "4"}, "arr": {"et": "10:10"}}
        ]}}
    });
    json!({ "bytes": payload.to_string() })
}

#[test]
fn halfway_between_departed_and_next() {
    let run = normalize(&two_stop_message("2025-09-05T10:05:00+01:00")).unwrap();
    let snapshot = locate(&run, received(), &coords()).unwrap();

    assert_eq!(snapshot.rid, "R1");
    assert_eq!(snapshot.from_tpl, "A");
    assert_eq!(snapshot.to_tpl, "B");
    assert_eq!(snapshot.state, MovementState::Enroute);
    assert_abs_diff_eq!(snapshot.ratio, 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(snapshot.lat, 52.1, epsilon = 1e-9);
    assert_abs_diff_eq!(snapshot.lon, -1.2, epsilon = 1e-9);
    assert_eq!(snapshot.platform.as_deref(), Some("1"));
    assert_eq!(snapshot.ts.to_rfc3339(), "2025-09-05T10:05:00+01:00");
}

#[test]
fn arrived_without_departure_is_dwell_at_next() {
    let run = normalize(&two_stop_message("2025-09-05T10:10:00+01:00")).unwrap();
    let snapshot = locate(&run, received(), &coords()).unwrap();

    assert_eq!(snapshot.state, MovementState::Dwell);
    assert_eq!((snapshot.lat, snapshot.lon), (52.2, -1.4));
    assert_abs_diff_eq!(snapshot.ratio, 1.0);
}

#[test]
fn standing_at_last_reported_stop_is_unresolved() {
    let payload = json!({
        "ts": "2025-09-05T10:05:00+01:00",
        "uR": {"TS": {"rid": "R9", "ssd": "2025-09-05", "Location": [
            {"tpl": "A", "dep": {"at": "10:00"}},
            {"tpl": "B", "arr": {"at": "10:04"}, "dep": {"et": "10:12"}}
        ]}}
    });
    let run = normalize(&payload).unwrap();

    // B was reached at 10:04 and is left at 10:12, so it is neither prev nor next
    assert_eq!(
        locate(&run, received(), &coords()),
        Err(LocateError::Unresolved(ResolveError::NoBracket))
    );
}

#[test]
fn single_location_is_dwell_in_place() {
    let payload = json!({
        "ts": "2025-09-05T10:05:00+01:00",
        "uR": {"TS": {"rid": "R3", "Location": {"tpl": "C", "plat": {"plat": "9"}}}}
    });
    let run = normalize(&payload).unwrap();
    let snapshot = locate(&run, received(), &coords()).unwrap();

    assert_eq!(snapshot.from_tpl, "C");
    assert_eq!(snapshot.to_tpl, "C");
    assert_eq!(snapshot.state, MovementState::Dwell);
    assert_abs_diff_eq!(snapshot.ratio, 0.0);
    assert_eq!((snapshot.lat, snapshot.lon), (51.5, -0.12));
    assert_eq!(snapshot.platform.as_deref(), Some("9"));
}

#[test]
fn single_location_without_coordinates_is_dropped() {
    let payload = json!({"uR": {"TS": {"rid": "R4", "Location": {"tpl": "NOWHERE"}}}});
    let run = normalize(&payload).unwrap();

    assert!(matches!(
        locate(&run, received(), &coords()),
        Err(LocateError::NoCoordinates { .. })
    ));
}

#[test]
fn no_coordinates_on_either_endpoint_yields_nothing() {
    let payload = json!({
        "ts": "2025-09-05T10:05:00+01:00",
        "uR": {"TS": {"rid": "R5", "ssd": "2025-09-05", "Location": [
            {"tpl": "X1", "dep": {"at": "10:00"}},
            {"tpl": "X2", "arr": {"et": "10:10"}}
        ]}}
    });
    let run = normalize(&payload).unwrap();

    assert_eq!(
        locate(&run, received(), &coords()),
        Err(LocateError::NoCoordinates {
            from_tpl: "X1".to_string(),
            to_tpl: "X2".to_string(),
        })
    );
}

#[test]
fn one_known_endpoint_is_pinned_as_unknown() {
    let payload = json!({
        "ts": "2025-09-05T10:05:00+01:00",
        "uR": {"TS": {"rid": "R6", "ssd": "2025-09-05", "Location": [
            {"tpl": "A", "dep": {"at": "10:00"}},
            {"tpl": "X2", "arr": {"et": "10:10"}}
        ]}}
    });
    let run = normalize(&payload).unwrap();
    let snapshot = locate(&run, received(), &coords()).unwrap();

    assert_eq!(snapshot.state, MovementState::Unknown);
    assert_abs_diff_eq!(snapshot.ratio, 0.0);
    assert_eq!((snapshot.lat, snapshot.lon), (52.0, -1.0));
    assert_eq!(snapshot.to_tpl, "X2");
}

#[test]
fn missing_timestamp_uses_ingestion_time() {
    let payload = json!({
        "uR": {"TS": {"rid": "R7", "ssd": "2025-09-05", "Location": [
            {"tpl": "A", "dep": {"at": "22:00"}},
            {"tpl": "B", "arr": {"et": "23:30"}}
        ]}}
    });
    let run = normalize(&payload).unwrap();
    let snapshot = locate(&run, received(), &coords()).unwrap();

    assert_eq!(snapshot.ts, received().fixed_offset());
    assert_eq!(snapshot.state, MovementState::Enroute);
    assert!(snapshot.ratio > 0.0 && snapshot.ratio < 1.0);
}

#[test]
fn sweeps_through_the_store_classify_changes() {
    let store = PositionStore::new(StoreOptions::default());
    let mut detector = ChangeDetector::new();
    let window = chrono::Duration::hours(24);

    let mut x = locate(
        &normalize(&two_stop_message("2025-09-05T10:02:00+01:00")).unwrap(),
        received(),
        &coords(),
    )
    .unwrap();
    x.rid = "X".to_string();
    let mut y = x.clone();
    y.rid = "Y".to_string();

    store.upsert(x.clone());
    store.upsert(y);
    let first = detector.diff(&store.snapshot_all(window));
    assert_eq!(first.added.len(), 2);

    let mut moved = locate(
        &normalize(&two_stop_message("2025-09-05T10:08:00+01:00")).unwrap(),
        received(),
        &coords(),
    )
    .unwrap();
    moved.rid = "X".to_string();
    let mut z = x;
    z.rid = "Z".to_string();

    store.upsert(moved);
    store.upsert(z);
    assert_eq!(store.evict_older_than(window), 0);
    // Y went quiet; take it out of the sweep by hand
    let second: Vec<Arc<_>> = store
        .snapshot_all(window)
        .into_iter()
        .filter(|s| s.rid != "Y")
        .collect();

    let changes = detector.diff(&second);
    let rids = |list: &[Arc<super::PositionSnapshot>]| -> Vec<String> {
        list.iter().map(|s| s.rid.clone()).collect()
    };
    assert_eq!(rids(&changes.updated), vec!["X".to_string()]);
    assert_eq!(rids(&changes.added), vec!["Z".to_string()]);
    assert_eq!(changes.removed, vec!["Y".to_string()]);

    assert!(detector.diff(&second).is_empty());
}
