// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::{ScheduleLocation, TimeIntent, TimeTier, TrainRun};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("run has a single location and nothing to bracket")]
    SingleLocation,
    #[error("no departed/next-arriving pair brackets the reference instant")]
    NoBracket,
}

/// The last-departed and next-arriving locations around a reference instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Bracket<'a> {
    pub prev: &'a ScheduleLocation,
    pub next: &'a ScheduleLocation,
    pub left_at: DateTime<FixedOffset>,
    pub arrives_at: DateTime<FixedOffset>,
}

/// Effective time for a location's arrival or departure.
///
/// Actual beats expected for the same intent. With neither, the public
/// timetable, then the working timetable, then the working pass time are used.
/// The result carries the reference instant's offset.
pub fn pick_time(
    location: &ScheduleLocation,
    intent: TimeIntent,
    service_date: NaiveDate,
    offset: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    let fallbacks = [
        (intent, TimeTier::Actual),
        (intent, TimeTier::Expected),
        (intent, TimeTier::PublicTimetable),
        (intent, TimeTier::WorkingTimetable),
        (TimeIntent::Pass, TimeTier::WorkingTimetable),
    ];

    fallbacks
        .into_iter()
        .find_map(|(intent, tier)| location.observation(intent, tier))
        .and_then(|time| at_service_date(service_date, time, offset))
}

fn at_service_date(
    service_date: NaiveDate,
    time: NaiveTime,
    offset: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    offset
        .from_local_datetime(&service_date.and_time(time))
        .single()
}

fn pass_time(
    location: &ScheduleLocation,
    tiers: &[TimeTier],
    service_date: NaiveDate,
    offset: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    tiers
        .iter()
        .find_map(|tier| location.observation(TimeIntent::Pass, *tier))
        .and_then(|time| at_service_date(service_date, time, offset))
}

/// When the train left (or passed, or reached) this location.
pub fn leave_instant(
    location: &ScheduleLocation,
    service_date: NaiveDate,
    offset: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    pick_time(location, TimeIntent::Departure, service_date, offset)
        .or_else(|| {
            pass_time(
                location,
                &[TimeTier::Actual, TimeTier::Expected],
                service_date,
                offset,
            )
        })
        .or_else(|| pick_time(location, TimeIntent::Arrival, service_date, offset))
}

pub fn arrive_instant(
    location: &ScheduleLocation,
    service_date: NaiveDate,
    offset: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    pick_time(location, TimeIntent::Arrival, service_date, offset)
        .or_else(|| pass_time(location, &[TimeTier::Expected], service_date, offset))
}

/// Walks the run in traversal order looking for the pair around `now`.
pub fn resolve_bracket<'a>(
    run: &'a TrainRun,
    now: &DateTime<FixedOffset>,
) -> Result<Bracket<'a>, ResolveError> {
    let offset = now.offset();
    let service_date = run.service_date.unwrap_or_else(|| now.date_naive());

    let mut prev: Option<(&ScheduleLocation, DateTime<FixedOffset>)> = None;

    for location in &run.locations {
        // Checked before this location can become prev, so a train arriving
        // exactly at `now` is bracketed towards it rather than past it.
        if let Some((prev_location, left_at)) = prev {
            if let Some(arrives_at) = arrive_instant(location, service_date, offset) {
                if arrives_at >= *now {
                    return Ok(Bracket {
                        prev: prev_location,
                        next: location,
                        left_at,
                        arrives_at,
                    });
                }
            }
        }

        if let Some(left_at) = leave_instant(location, service_date, offset) {
            if left_at <= *now {
                prev = Some((location, left_at));
            }
        }
    }

    match run.locations.len() {
        1 => Err(ResolveError::SingleLocation),
        _ => Err(ResolveError::NoBracket),
    }
}
