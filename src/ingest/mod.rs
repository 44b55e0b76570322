// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Feed consumption on a dedicated thread: normalize, locate, upsert.
//!
//! Nothing here awaits. Every per-message failure is absorbed and only shows
//! up in [`IngestStats`].

pub mod feeds;

use crate::coordinates::CoordinateLookup;
use crate::estimation::locate;
use crate::position_store::PositionStore;
use crate::schedule::normalize::normalize_bytes;
use crate::shutdown::{CancellationToken, sleep_or_cancelled};
use chrono::{DateTime, Utc};
use feeds::{FeedError, FeedSource};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct IngestOptions {
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            error_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Default, Debug)]
pub struct IngestStats {
    total: AtomicU64,
    errors: AtomicU64,
    unresolved: AtomicU64,
    emitted: AtomicU64,
    consumer_active: AtomicBool,
    last_error: Mutex<Option<String>>,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct IngestStatsSnapshot {
    pub total: u64,
    pub errors: u64,
    pub unresolved: u64,
    pub emitted: u64,
    pub consumer_active: bool,
    pub last_error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl IngestStats {
    pub fn record_error(&self, error: String) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn set_active(&self, active: bool) {
        self.consumer_active.store(active, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            consumer_active: self.consumer_active.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_update: *self
                .last_update
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Emitted,
    Malformed,
    Unresolved,
}

pub struct Ingestor {
    store: Arc<PositionStore>,
    coordinates: Arc<dyn CoordinateLookup>,
    stats: Arc<IngestStats>,
}

impl Ingestor {
    pub fn new(store: Arc<PositionStore>, coordinates: Arc<dyn CoordinateLookup>) -> Self {
        Self {
            store,
            coordinates,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn process(&self, raw: &[u8], received_at: DateTime<Utc>) -> MessageOutcome {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let run = match normalize_bytes(raw) {
            Ok(run) => run,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed message");
                self.stats.record_error(e.to_string());
                return MessageOutcome::Malformed;
            }
        };

        match locate(&run, received_at, self.coordinates.as_ref()) {
            Ok(snapshot) => {
                tracing::trace!(
                    rid = %snapshot.rid,
                    state = snapshot.state.as_str(),
                    ratio = snapshot.ratio,
                    "position updated"
                );
                self.store.upsert(snapshot);
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
                *self
                    .stats
                    .last_update
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(received_at);
                MessageOutcome::Emitted
            }
            Err(e) => {
                tracing::trace!(rid = %run.rid, reason = %e, "no position");
                self.stats.unresolved.fetch_add(1, Ordering::Relaxed);
                MessageOutcome::Unresolved
            }
        }
    }

    pub fn run<F: FeedSource + ?Sized>(
        &self,
        feed: &mut F,
        options: &IngestOptions,
        token: &CancellationToken,
    ) {
        self.stats.set_active(true);
        tracing::info!("ingestion started");

        while !token.is_cancelled() {
            match feed.poll(options.poll_timeout) {
                Ok(Some(raw)) => {
                    self.process(&raw, Utc::now());
                }
                Ok(None) => {}
                Err(FeedError::Closed) => {
                    tracing::info!("feed exhausted, ingestion stopping");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, backoff = ?options.error_backoff, "feed read failed");
                    self.stats.record_error(e.to_string());
                    if sleep_or_cancelled(token, options.error_backoff) {
                        break;
                    }
                }
            }
        }

        self.stats.set_active(false);
        tracing::info!(stats = ?self.stats.snapshot(), "ingestion stopped");
    }
}

pub fn spawn_ingestion<M>(
    ingestor: Arc<Ingestor>,
    make_feed: M,
    options: IngestOptions,
    token: CancellationToken,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    M: FnOnce() -> Result<Box<dyn FeedSource>, FeedError> + Send + 'static,
{
    // blocking HTTP clients cannot be built inside the async runtime
    std::thread::Builder::new()
        .name("larch-ingest".to_string())
        .spawn(move || match make_feed() {
            Ok(mut feed) => ingestor.run(feed.as_mut(), &options, &token),
            Err(e) => {
                tracing::error!(error = %e, "could not open feed");
                ingestor.stats.record_error(e.to_string());
            }
        })
}
