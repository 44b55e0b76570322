// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::{ScheduleLocation, TimeIntent, TimeObservation, TimeTier, TrainRun};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("envelope `bytes` field is not a JSON string")]
    InvalidEnvelope,
    #[error("payload has no uR.TS train status")]
    MissingTrainStatus,
    #[error("train status has no rid")]
    MissingRunId,
    #[error("train status {rid} has no locations")]
    NoLocations { rid: String },
    #[error("location {tiploc} has unparseable time '{value}'")]
    InvalidTime { tiploc: String, value: String },
    #[error("unparseable service date '{0}'")]
    InvalidServiceDate(String),
}

/// Parses raw feed bytes, unwrapping one level of envelope, into a [`TrainRun`].
pub fn normalize_bytes(bytes: &[u8]) -> Result<TrainRun, NormalizeError> {
    let wrapper: Value = serde_json::from_slice(bytes)?;
    normalize(&wrapper)
}

pub fn normalize(wrapper: &Value) -> Result<TrainRun, NormalizeError> {
    let unwrapped;
    let payload = match wrapper.get("bytes") {
        Some(Value::String(inner)) if !inner.is_empty() => {
            unwrapped = serde_json::from_str::<Value>(inner)?;
            &unwrapped
        }
        Some(Value::String(_)) | Some(Value::Null) | None => wrapper,
        Some(_) => return Err(NormalizeError::InvalidEnvelope),
    };

    // An unreadable `ts` falls back to ingestion time further down the line.
    let declared_at = non_empty_str(payload.get("ts")).and_then(|ts| {
        DateTime::<FixedOffset>::parse_from_rfc3339(ts)
            .inspect_err(|e| tracing::debug!(ts, error = %e, "ignoring unparseable message timestamp"))
            .ok()
    });

    let train_status = payload
        .get("uR")
        .and_then(|ur| ur.get("TS"))
        .filter(|ts| ts.is_object())
        .ok_or(NormalizeError::MissingTrainStatus)?;

    let rid = non_empty_str(train_status.get("rid"))
        .ok_or(NormalizeError::MissingRunId)?
        .to_string();
    let uid = non_empty_str(train_status.get("uid")).map(str::to_string);

    let service_date = match non_empty_str(train_status.get("ssd")) {
        Some(ssd) => Some(
            NaiveDate::parse_from_str(ssd, "%Y-%m-%d")
                .map_err(|_| NormalizeError::InvalidServiceDate(ssd.to_string()))?,
        ),
        None => None,
    };

    // A lone Location arrives as an object rather than a one element list.
    let raw_locations: Vec<&Value> = match train_status.get("Location") {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    };

    if raw_locations.is_empty() {
        return Err(NormalizeError::NoLocations { rid });
    }

    let locations = raw_locations
        .into_iter()
        .map(normalize_location)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TrainRun {
        rid,
        uid,
        service_date,
        declared_at,
        locations,
    })
}

fn normalize_location(raw: &Value) -> Result<ScheduleLocation, NormalizeError> {
    let tiploc = non_empty_str(raw.get("tpl")).unwrap_or_default().to_string();

    let mut observations = Vec::new();

    for (key, intent) in [
        ("arr", TimeIntent::Arrival),
        ("dep", TimeIntent::Departure),
        ("pass", TimeIntent::Pass),
    ] {
        if let Some(node) = raw.get(key).filter(|node| node.is_object()) {
            for (field, tier) in [("at", TimeTier::Actual), ("et", TimeTier::Expected)] {
                if let Some(value) = non_empty_str(node.get(field)) {
                    observations.push(TimeObservation {
                        intent,
                        tier,
                        time: parse_time(&tiploc, value)?,
                    });
                }
            }
        }
    }

    for (field, intent, tier) in [
        ("pta", TimeIntent::Arrival, TimeTier::PublicTimetable),
        ("ptd", TimeIntent::Departure, TimeTier::PublicTimetable),
        ("wta", TimeIntent::Arrival, TimeTier::WorkingTimetable),
        ("wtd", TimeIntent::Departure, TimeTier::WorkingTimetable),
        ("wtp", TimeIntent::Pass, TimeTier::WorkingTimetable),
    ] {
        if let Some(value) = non_empty_str(raw.get(field)) {
            observations.push(TimeObservation {
                intent,
                tier,
                time: parse_time(&tiploc, value)?,
            });
        }
    }

    let is_pass = raw.get("pass").is_some_and(Value::is_object) || raw.get("wtp").is_some();

    Ok(ScheduleLocation {
        tiploc,
        observations,
        platform: platform_label(raw.get("plat")),
        is_pass,
    })
}

fn platform_label(plat: Option<&Value>) -> Option<String> {
    match plat? {
        Value::String(label) => Some(label.clone()),
        Value::Object(fields) => fields
            .get("")
            .or_else(|| fields.get("plat"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// `HH:MM` when five characters long, `HH:MM:SS` otherwise.
pub fn parse_time(tiploc: &str, value: &str) -> Result<NaiveTime, NormalizeError> {
    let parsed = match value.len() {
        5 => NaiveTime::parse_from_str(value, "%H:%M"),
        _ => NaiveTime::parse_from_str(value, "%H:%M:%S"),
    };

    parsed.map_err(|_| NormalizeError::InvalidTime {
        tiploc: tiploc.to_string(),
        value: value.to_string(),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
