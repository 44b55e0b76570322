// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Canonical, strongly typed view of a Darwin train status update.
//!
//! Raw feed JSON never leaves [`normalize`]; everything downstream works on
//! [`TrainRun`] and [`ScheduleLocation`].

pub mod normalize;
pub mod resolve;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Trustworthiness of a time observation, most reliable first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeTier {
    Actual,
    Expected,
    PublicTimetable,
    WorkingTimetable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeIntent {
    Arrival,
    Departure,
    Pass,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeObservation {
    pub intent: TimeIntent,
    pub tier: TimeTier,
    pub time: NaiveTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLocation {
    pub tiploc: String,
    pub observations: Vec<TimeObservation>,
    pub platform: Option<String>,
    pub is_pass: bool,
}

impl ScheduleLocation {
    pub fn new(tiploc: impl Into<String>) -> Self {
        Self {
            tiploc: tiploc.into(),
            observations: Vec::new(),
            platform: None,
            is_pass: false,
        }
    }

    pub fn with_time(mut self, intent: TimeIntent, tier: TimeTier, time: NaiveTime) -> Self {
        self.observations.push(TimeObservation { intent, tier, time });
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn passing(mut self) -> Self {
        self.is_pass = true;
        self
    }

    /// First observation recorded for this intent and tier, in input order.
    pub fn observation(&self, intent: TimeIntent, tier: TimeTier) -> Option<NaiveTime> {
        self.observations
            .iter()
            .find(|obs| obs.intent == intent && obs.tier == tier)
            .map(|obs| obs.time)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainRun {
    pub rid: String,
    pub uid: Option<String>,
    pub service_date: Option<NaiveDate>,
    /// Timestamp the message itself declares, if it carried a parseable one.
    pub declared_at: Option<DateTime<FixedOffset>>,
    pub locations: Vec<ScheduleLocation>,
}
