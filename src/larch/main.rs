// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Larch: estimates live rail positions from the Darwin train status feed and
// pushes changes to websocket subscribers.

use actix_web::{App, Error, HttpRequest, HttpResponse, HttpServer, web};
use actix_web_actors::ws;
use anyhow::Context;
use clap::Parser;
use railpos::broadcast::{Broadcaster, run_update_loop};
use railpos::coordinates::StaticCoordinates;
use railpos::ingest::feeds::{FeedError, FeedSource, HttpPollFeed, JsonLinesFeed};
use railpos::ingest::{IngestStats, Ingestor, spawn_ingestion};
use railpos::position_store::PositionStore;
use railpos::position_store::persistence::ZlibFileOverflow;
use railpos::shutdown::{CancellationToken, cancel_on_ctrl_c};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod position_websocket;

use config::Args;
use position_websocket::PositionWebSocket;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

type FeedFactory = Box<dyn FnOnce() -> Result<Box<dyn FeedSource>, FeedError> + Send>;

async fn index(
    req: HttpRequest,
    stream: web::Payload,
    broadcaster: web::Data<Arc<Broadcaster>>,
) -> Result<HttpResponse, Error> {
    ws::start(
        PositionWebSocket::new(broadcaster.get_ref().clone()),
        &req,
        stream,
    )
}

fn feed_factory(args: &Args) -> anyhow::Result<FeedFactory> {
    match (&args.feed_file, &args.feed_url) {
        (Some(path), _) => {
            let path = path.clone();
            Ok(Box::new(move || {
                JsonLinesFeed::open(path).map(|feed| Box::new(feed) as Box<dyn FeedSource>)
            }))
        }
        (None, Some(url)) => {
            let url = url.clone();
            let interval = Duration::from_secs(args.feed_poll_interval_secs);
            Ok(Box::new(move || {
                HttpPollFeed::new(url, interval).map(|feed| Box::new(feed) as Box<dyn FeedSource>)
            }))
        }
        (None, None) => anyhow::bail!("either FEED_FILE or FEED_URL must be set"),
    }
}

/// Periodic eviction and durable flush, plus one last flush on shutdown.
async fn run_maintenance(
    store: Arc<PositionStore>,
    stats: Arc<IngestStats>,
    eviction_interval: Duration,
    persist_interval: Duration,
    token: CancellationToken,
) {
    let max_age = store.options().max_age;

    let mut evict = tokio::time::interval(eviction_interval);
    let mut persist = tokio::time::interval(persist_interval);
    evict.tick().await;
    persist.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = evict.tick() => {
                store.evict_older_than(max_age);
                tracing::info!(stats = ?stats.snapshot(), tracked = store.len(), "ingestion status");
            }
            _ = persist.tick() => flush(&store).await,
        }
    }

    flush(&store).await;
}

async fn flush(store: &Arc<PositionStore>) {
    let store = store.clone();

    match tokio::task::spawn_blocking(move || store.persist()).await {
        Ok(Ok(count)) => tracing::debug!(count, "persisted positions"),
        Ok(Err(e)) => tracing::warn!(error = %e, "could not persist positions"),
        Err(e) => tracing::warn!(error = %e, "persist task failed"),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let coordinates = StaticCoordinates::from_csv_path(&args.tiploc_csv)
        .with_context(|| format!("loading tiplocs from {}", args.tiploc_csv.display()))?;
    tracing::info!(count = coordinates.len(), "loaded tiploc coordinates");

    let store = match &args.persist_path {
        Some(path) => {
            let overflow = ZlibFileOverflow::open(path)
                .with_context(|| format!("opening persisted positions at {}", path.display()))?;
            PositionStore::with_overflow(args.store_options(), Arc::new(overflow))
        }
        None => PositionStore::new(args.store_options()),
    };
    let store = Arc::new(store);
    store.evict_older_than(store.options().max_age);

    let token = CancellationToken::new();
    actix_web::rt::spawn(cancel_on_ctrl_c(token.clone()));

    let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(coordinates)));
    let stats = ingestor.stats();
    let ingest_thread = spawn_ingestion(
        ingestor,
        feed_factory(&args)?,
        args.ingest_options(),
        token.clone(),
    )
    .context("spawning ingestion thread")?;

    let broadcaster = Arc::new(Broadcaster::new(store.clone(), args.cadence_policy()));
    let broadcast_task = actix_web::rt::spawn(run_update_loop(broadcaster.clone(), token.clone()));

    let maintenance_task = actix_web::rt::spawn(run_maintenance(
        store.clone(),
        stats,
        Duration::from_secs(args.eviction_interval_secs),
        Duration::from_secs(args.persist_interval_secs),
        token.clone(),
    ));

    tracing::info!(address = %args.bind_address, port = args.port, "starting websocket server");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(broadcaster.clone()))
            .route("/ws/", web::get().to(index))
    })
    .workers(args.workers)
    .disable_signals()
    .bind((args.bind_address.as_str(), args.port))?
    .run();

    let server_handle = server.handle();
    let stop_token = token.clone();
    actix_web::rt::spawn(async move {
        stop_token.cancelled().await;
        server_handle.stop(true).await;
    });

    let served = server.await;
    token.cancel();

    if let Err(e) = broadcast_task.await {
        tracing::warn!(error = %e, "broadcast loop ended abnormally");
    }
    if let Err(e) = maintenance_task.await {
        tracing::warn!(error = %e, "maintenance task ended abnormally");
    }
    if tokio::task::spawn_blocking(move || ingest_thread.join())
        .await
        .map_or(true, |joined| joined.is_err())
    {
        tracing::warn!("ingestion thread ended abnormally");
    }

    served.context("websocket server")?;
    Ok(())
}
