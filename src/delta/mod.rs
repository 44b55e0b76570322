// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::ahash_fast_hash;
use crate::estimation::PositionSnapshot;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Coordinates are compared at four decimal places (about 11 m).
const COORDINATE_SCALE: f64 = 10_000.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<Arc<PositionSnapshot>>,
    pub updated: Vec<Arc<PositionSnapshot>>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Hash of the fields a subscriber can see change, with sub-resolution
/// coordinate jitter rounded away.
pub fn fingerprint(snapshot: &PositionSnapshot) -> u64 {
    let lat = (snapshot.lat * COORDINATE_SCALE).round() as i64;
    let lon = (snapshot.lon * COORDINATE_SCALE).round() as i64;

    ahash_fast_hash(&(lat, lon, snapshot.state, &snapshot.platform))
}

#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: AHashMap<String, u64>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> usize {
        self.previous.len()
    }

    pub fn diff(&mut self, current: &[Arc<PositionSnapshot>]) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut next = AHashMap::with_capacity(current.len());

        for snapshot in current {
            let print = fingerprint(snapshot);

            match self.previous.get(&snapshot.rid) {
                None => changes.added.push(snapshot.clone()),
                Some(old) if *old != print => changes.updated.push(snapshot.clone()),
                Some(_) => {}
            }

            next.insert(snapshot.rid.clone(), print);
        }

        changes.removed = self
            .previous
            .keys()
            .filter(|rid| !next.contains_key(*rid))
            .cloned()
            .collect();

        changes.added.sort_by(|a, b| a.rid.cmp(&b.rid));
        changes.updated.sort_by(|a, b| a.rid.cmp(&b.rid));
        changes.removed.sort();

        self.previous = next;
        changes
    }
}
