// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Turns a normalized [`TrainRun`] into a [`PositionSnapshot`].

pub mod interpolate;

#[cfg(test)]
mod scenario_tests;

use crate::coordinates::CoordinateLookup;
use crate::schedule::TrainRun;
use crate::schedule::resolve::{ResolveError, resolve_bracket};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementState {
    Enroute,
    Dwell,
    Stopped,
    Unknown,
}

impl MovementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementState::Enroute => "enroute",
            MovementState::Dwell => "dwell",
            MovementState::Stopped => "stopped",
            MovementState::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for MovementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enroute" => Ok(MovementState::Enroute),
            "dwell" => Ok(MovementState::Dwell),
            "stopped" => Ok(MovementState::Stopped),
            "unknown" => Ok(MovementState::Unknown),
            other => Err(format!("unknown movement state '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub rid: String,
    pub uid: Option<String>,
    /// Message timestamp, or ingestion time when the message had none.
    pub ts: DateTime<FixedOffset>,
    pub from_tpl: String,
    pub to_tpl: String,
    pub lat: f64,
    pub lon: f64,
    pub ratio: f64,
    pub state: MovementState,
    pub platform: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("no position: {0}")]
    Unresolved(#[from] ResolveError),
    #[error("no coordinates for {from_tpl} or {to_tpl}")]
    NoCoordinates { from_tpl: String, to_tpl: String },
}

/// Full estimation pipeline for one run.
///
/// The reference instant is the message's own timestamp, or `received_at`
/// when it had none. Runs with a single location are reported as dwelling
/// there. A bracket where only one endpoint has coordinates is pinned to that
/// endpoint with state `unknown`.
pub fn locate<L: CoordinateLookup + ?Sized>(
    run: &TrainRun,
    received_at: DateTime<Utc>,
    coordinates: &L,
) -> Result<PositionSnapshot, LocateError> {
    let now = run
        .declared_at
        .unwrap_or_else(|| received_at.fixed_offset());

    let bracket = match resolve_bracket(run, &now) {
        Ok(bracket) => bracket,
        Err(ResolveError::SingleLocation) => return single_location_dwell(run, now, coordinates),
        Err(e) => return Err(e.into()),
    };

    let prev_coord = coordinates.lookup(&bracket.prev.tiploc);
    let next_coord = coordinates.lookup(&bracket.next.tiploc);

    let (lat, lon, ratio, state) = match (prev_coord, next_coord) {
        (Some(prev), Some(next)) => {
            let est = interpolate::estimate(&bracket, &now, prev, next);
            (est.lat, est.lon, est.ratio, est.state)
        }
        (_, Some((lat, lon))) | (Some((lat, lon)), None) => {
            tracing::trace!(rid = %run.rid, "pinning to the only endpoint with coordinates");
            (lat, lon, 0.0, MovementState::Unknown)
        }
        (None, None) => {
            return Err(LocateError::NoCoordinates {
                from_tpl: bracket.prev.tiploc.clone(),
                to_tpl: bracket.next.tiploc.clone(),
            });
        }
    };

    Ok(PositionSnapshot {
        rid: run.rid.clone(),
        uid: run.uid.clone(),
        ts: now,
        from_tpl: bracket.prev.tiploc.clone(),
        to_tpl: bracket.next.tiploc.clone(),
        lat,
        lon,
        ratio,
        state,
        platform: bracket.prev.platform.clone(),
    })
}

fn single_location_dwell<L: CoordinateLookup + ?Sized>(
    run: &TrainRun,
    now: DateTime<FixedOffset>,
    coordinates: &L,
) -> Result<PositionSnapshot, LocateError> {
    let Some(only) = run.locations.first() else {
        return Err(ResolveError::NoBracket.into());
    };

    let (lat, lon) = coordinates
        .lookup(&only.tiploc)
        .ok_or_else(|| LocateError::NoCoordinates {
            from_tpl: only.tiploc.clone(),
            to_tpl: only.tiploc.clone(),
        })?;

    Ok(PositionSnapshot {
        rid: run.rid.clone(),
        uid: run.uid.clone(),
        ts: now,
        from_tpl: only.tiploc.clone(),
        to_tpl: only.tiploc.clone(),
        lat,
        lon,
        ratio: 0.0,
        state: MovementState::Dwell,
        platform: only.platform.clone(),
    })
}
