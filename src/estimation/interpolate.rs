// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::MovementState;
use crate::schedule::resolve::{Bracket, pick_time};
use crate::schedule::TimeIntent;
use chrono::{DateTime, FixedOffset};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Estimate {
    pub lat: f64,
    pub lon: f64,
    pub ratio: f64,
    pub state: MovementState,
}

/// Fraction of the `t0..t1` leg covered at `now`, in `[0, 1]`.
///
/// A zero or negative interval counts as fully arrived.
pub fn progress_ratio(
    t0: &DateTime<FixedOffset>,
    t1: &DateTime<FixedOffset>,
    now: &DateTime<FixedOffset>,
) -> f64 {
    let total = (*t1 - *t0).num_milliseconds();
    if total <= 0 {
        return 1.0;
    }

    let elapsed = (*now - *t0).num_milliseconds();
    (elapsed as f64 / total as f64).clamp(0.0, 1.0)
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

fn dwelling_at_next(bracket: &Bracket<'_>, now: &DateTime<FixedOffset>) -> bool {
    let date = bracket.arrives_at.date_naive();
    let offset = now.offset();

    let arrival = pick_time(bracket.next, TimeIntent::Arrival, date, offset);
    let departure = pick_time(bracket.next, TimeIntent::Departure, date, offset);

    match arrival {
        Some(arrival) if arrival <= *now => departure.is_none_or(|departure| departure > *now),
        _ => false,
    }
}

pub fn estimate(
    bracket: &Bracket<'_>,
    now: &DateTime<FixedOffset>,
    prev: (f64, f64),
    next: (f64, f64),
) -> Estimate {
    let ratio = progress_ratio(&bracket.left_at, &bracket.arrives_at, now);

    if dwelling_at_next(bracket, now) {
        return Estimate {
            lat: next.0,
            lon: next.1,
            ratio,
            state: MovementState::Dwell,
        };
    }

    Estimate {
        lat: lerp(prev.0, next.0, ratio),
        lon: lerp(prev.1, next.1, ratio),
        ratio,
        state: MovementState::Enroute,
    }
}
