// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Latest position per run, shared between the ingestion thread, the
//! broadcast loop and any query surface.

pub mod persistence;

use crate::estimation::{MovementState, PositionSnapshot};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use persistence::{OverflowStore, PersistenceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub max_age: chrono::Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_age: chrono::Duration::minutes(1440),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredPosition {
    pub snapshot: Arc<PositionSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl StoredPosition {
    /// The later of observation time and write time.
    pub fn freshness(&self) -> DateTime<Utc> {
        self.snapshot.ts.with_timezone(&Utc).max(self.updated_at)
    }
}

pub struct PositionStore {
    entries: DashMap<String, StoredPosition>,
    overflow: Option<Arc<dyn OverflowStore>>,
    options: StoreOptions,
}

impl PositionStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            entries: DashMap::new(),
            overflow: None,
            options,
        }
    }

    pub fn with_overflow(options: StoreOptions, overflow: Arc<dyn OverflowStore>) -> Self {
        Self {
            entries: DashMap::new(),
            overflow: Some(overflow),
            options,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn upsert(&self, snapshot: PositionSnapshot) {
        self.upsert_at(snapshot, Utc::now());
    }

    pub fn upsert_at(&self, snapshot: PositionSnapshot, updated_at: DateTime<Utc>) {
        let stored = StoredPosition {
            snapshot: Arc::new(snapshot),
            updated_at,
        };
        self.entries.insert(stored.snapshot.rid.clone(), stored);
    }

    /// Memory first, then the overflow store.
    pub fn get(&self, rid: &str) -> Option<Arc<PositionSnapshot>> {
        if let Some(entry) = self.entries.get(rid) {
            return Some(entry.snapshot.clone());
        }

        self.overflow.as_ref().and_then(|overflow| overflow.get(rid))
    }

    pub fn snapshot_all(&self, max_age: chrono::Duration) -> Vec<Arc<PositionSnapshot>> {
        self.snapshot_all_at(max_age, Utc::now())
    }

    pub fn snapshot_all_at(
        &self,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Vec<Arc<PositionSnapshot>> {
        let cutoff = now - max_age;

        self.entries
            .iter()
            .filter(|entry| entry.freshness() >= cutoff)
            .map(|entry| entry.snapshot.clone())
            .collect()
    }

    pub fn list(
        &self,
        max_age: chrono::Duration,
        state_filter: Option<MovementState>,
    ) -> Vec<Arc<PositionSnapshot>> {
        self.list_at(max_age, state_filter, Utc::now())
    }

    pub fn list_at(
        &self,
        max_age: chrono::Duration,
        state_filter: Option<MovementState>,
        now: DateTime<Utc>,
    ) -> Vec<Arc<PositionSnapshot>> {
        let cutoff = now - max_age;
        let mut listed = self.snapshot_all_at(max_age, now);

        if let Some(overflow) = &self.overflow {
            listed.extend(
                overflow
                    .all()
                    .into_iter()
                    .filter(|stored| !self.entries.contains_key(&stored.snapshot.rid))
                    .filter(|stored| stored.freshness() >= cutoff)
                    .map(|stored| stored.snapshot),
            );
        }

        if let Some(state) = state_filter {
            listed.retain(|s| s.state == state);
        }

        listed.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| a.rid.cmp(&b.rid)));
        listed
    }

    pub fn evict_older_than(&self, max_age: chrono::Duration) -> usize {
        self.evict_older_than_at(max_age, Utc::now())
    }

    pub fn evict_older_than_at(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let mut evicted = 0;

        self.entries.retain(|_, stored| {
            let keep = stored.freshness() >= cutoff;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            tracing::info!(count = evicted, remaining = self.entries.len(), "evicted stale positions");
        }
        evicted
    }

    pub fn persist(&self) -> Result<usize, PersistenceError> {
        let Some(overflow) = &self.overflow else {
            return Ok(0);
        };

        let latest: Vec<StoredPosition> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        overflow.write_through(latest, Utc::now() - self.options.max_age)
    }
}
