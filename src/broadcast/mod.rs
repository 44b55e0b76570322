// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Fan-out of position changes to live subscribers.
//!
//! Every payload is serialized once and handed to each subscriber with a
//! non-blocking send, so a slow or dead connection never holds up the rest.

pub mod wire;

use crate::delta::{ChangeDetector, ChangeSet};
use crate::position_store::PositionStore;
use crate::shutdown::CancellationToken;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber is gone")]
    Closed,
    #[error("subscriber mailbox is full")]
    Full,
}

/// One end of a subscriber connection. `deliver` must never block.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError>;
}

impl Subscriber for tokio::sync::mpsc::Sender<Arc<str>> {
    fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        use tokio::sync::mpsc::error::TrySendError;

        self.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(actix::Message, Clone, Debug)]
#[rtype(result = "()")]
pub struct PositionFeed(pub Arc<str>);

impl Subscriber for actix::Recipient<PositionFeed> {
    fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        self.try_send(PositionFeed(payload)).map_err(|e| match e {
            actix::prelude::SendError::Full(_) => DeliveryError::Full,
            actix::prelude::SendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

pub type SubscriberId = u64;

#[derive(Clone, Debug)]
pub struct CadencePolicy {
    /// Up to this many subscribers counts as light load.
    pub light_load_subscribers: usize,
    pub light_load: Duration,
    pub heavy_load: Duration,
    pub error_backoff: Duration,
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            light_load_subscribers: 10,
            light_load: Duration::from_secs(1),
            heavy_load: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl CadencePolicy {
    pub fn cadence_for(&self, subscribers: usize) -> Duration {
        if subscribers > self.light_load_subscribers {
            self.heavy_load
        } else {
            self.light_load
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub skipped: usize,
    pub pruned: usize,
}

pub struct Broadcaster {
    subscribers: DashMap<SubscriberId, Arc<dyn Subscriber>>,
    // held across sweep, diff and push, and across initial dump plus registration
    detector: Mutex<ChangeDetector>,
    next_id: AtomicU64,
    store: Arc<PositionStore>,
    policy: CadencePolicy,
}

impl Broadcaster {
    pub fn new(store: Arc<PositionStore>, policy: CadencePolicy) -> Self {
        Self {
            subscribers: DashMap::new(),
            detector: Mutex::new(ChangeDetector::new()),
            next_id: AtomicU64::new(1),
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &CadencePolicy {
        &self.policy
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn detector(&self) -> MutexGuard<'_, ChangeDetector> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a subscriber after handing it the full current state.
    ///
    /// Returns `None` if the subscriber was already gone.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Option<SubscriberId> {
        let _detector = self.detector();

        match self.send_initial(subscriber.as_ref()) {
            Ok(()) | Err(DeliveryError::Full) => {}
            Err(DeliveryError::Closed) => return None,
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, subscriber);
        tracing::info!(id, subscribers = self.subscribers.len(), "subscriber joined");

        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            tracing::info!(id, subscribers = self.subscribers.len(), "subscriber left");
        }
    }

    pub fn resend_initial(&self, id: SubscriberId) -> Result<(), DeliveryError> {
        let subscriber = self
            .subscribers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(DeliveryError::Closed)?;

        let _detector = self.detector();
        self.send_initial(subscriber.as_ref())
    }

    fn send_initial(&self, subscriber: &dyn Subscriber) -> Result<(), DeliveryError> {
        let current = self.store.snapshot_all(self.store.options().max_age);

        match wire::encode_initial(&current, Utc::now()) {
            Ok(payload) => subscriber.deliver(payload),
            Err(e) => {
                tracing::error!(error = %e, "could not serialize initial state");
                Ok(())
            }
        }
    }

    pub fn push_payload(&self, payload: Arc<str>) -> PushReport {
        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut report = PushReport::default();

        for (id, subscriber) in targets {
            match subscriber.deliver(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    tracing::debug!(id, "subscriber lagging, skipped one update");
                    report.skipped += 1;
                }
                Err(DeliveryError::Closed) => {
                    self.subscribers.remove(&id);
                    report.pruned += 1;
                }
            }
        }

        if report.pruned > 0 {
            tracing::info!(
                pruned = report.pruned,
                subscribers = self.subscribers.len(),
                "pruned closed subscribers"
            );
        }

        report
    }

    pub fn push(&self, changes: &ChangeSet) -> Result<PushReport, serde_json::Error> {
        let payload = wire::encode_delta(changes, Utc::now())?;
        Ok(self.push_payload(payload))
    }

    /// Sweep, diff, and push if anything changed and anyone is listening.
    pub fn cycle(&self) -> Result<ChangeSet, serde_json::Error> {
        let mut detector = self.detector();
        let sweep = self.store.snapshot_all(self.store.options().max_age);
        let changes = detector.diff(&sweep);

        if !changes.is_empty() && !self.subscribers.is_empty() {
            let report = self.push(&changes)?;
            tracing::debug!(
                added = changes.added.len(),
                updated = changes.updated.len(),
                removed = changes.removed.len(),
                delivered = report.delivered,
                "pushed delta"
            );
        }

        Ok(changes)
    }
}

pub async fn run_update_loop(broadcaster: Arc<Broadcaster>, token: CancellationToken) {
    tracing::info!("broadcast loop started");

    loop {
        let wait = match broadcaster.cycle() {
            Ok(_) => broadcaster
                .policy()
                .cadence_for(broadcaster.subscriber_count()),
            Err(e) => {
                tracing::error!(error = %e, "broadcast cycle failed");
                broadcaster.policy().error_backoff
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::info!("broadcast loop stopped");
}
