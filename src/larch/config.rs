// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use clap::Parser;
use railpos::broadcast::CadencePolicy;
use railpos::ingest::IngestOptions;
use railpos::position_store::StoreOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Live rail position estimator and websocket broadcaster.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Newline-delimited JSON file of feed messages to replay
    #[arg(long, env = "FEED_FILE", conflicts_with = "feed_url", required_unless_present = "feed_url")]
    pub feed_file: Option<PathBuf>,

    /// HTTP endpoint returning newline-delimited JSON feed messages
    #[arg(long, env = "FEED_URL")]
    pub feed_url: Option<String>,

    /// Seconds between HTTP feed fetches
    #[arg(long, env = "FEED_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub feed_poll_interval_secs: u64,

    /// CSV of `tiploc,lat,lon`
    #[arg(long, env = "TIPLOC_CSV")]
    pub tiploc_csv: PathBuf,

    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    #[arg(long, env = "PORT", default_value_t = 52772)]
    pub port: u16,

    #[arg(long, env = "WORKER_AMOUNT", default_value_t = 2)]
    pub workers: usize,

    /// Up to one year
    #[arg(
        long,
        env = "MAX_AGE_MINUTES",
        default_value_t = 1440,
        value_parser = clap::value_parser!(i64).range(1..=525_600)
    )]
    pub max_age_minutes: i64,

    #[arg(long, env = "EVICTION_INTERVAL_SECS", default_value_t = 3600)]
    pub eviction_interval_secs: u64,

    #[arg(long, env = "POLL_TIMEOUT_MS", default_value_t = 1000)]
    pub poll_timeout_ms: u64,

    #[arg(long, env = "FEED_BACKOFF_SECS", default_value_t = 5)]
    pub feed_backoff_secs: u64,

    /// Where to keep the durable copy of positions; none when unset
    #[arg(long, env = "PERSIST_PATH")]
    pub persist_path: Option<PathBuf>,

    #[arg(long, env = "PERSIST_INTERVAL_SECS", default_value_t = 60)]
    pub persist_interval_secs: u64,

    #[arg(long, env = "LIGHT_LOAD_SUBSCRIBERS", default_value_t = 10)]
    pub light_load_subscribers: usize,

    #[arg(long, env = "LIGHT_LOAD_CADENCE_MS", default_value_t = 1000)]
    pub light_load_cadence_ms: u64,

    #[arg(long, env = "HEAVY_LOAD_CADENCE_MS", default_value_t = 2000)]
    pub heavy_load_cadence_ms: u64,
}

impl Args {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_age: chrono::Duration::minutes(self.max_age_minutes),
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            error_backoff: Duration::from_secs(self.feed_backoff_secs),
        }
    }

    pub fn cadence_policy(&self) -> CadencePolicy {
        CadencePolicy {
            light_load_subscribers: self.light_load_subscribers,
            light_load: Duration::from_millis(self.light_load_cadence_ms),
            heavy_load: Duration::from_millis(self.heavy_load_cadence_ms),
            ..CadencePolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_defaults() {
        let args = Args::try_parse_from([
            "larch",
            "--feed-file",
            "feed.ndjson",
            "--tiploc-csv",
            "tiplocs.csv",
        ])
        .unwrap();

        assert_eq!(args.port, 52772);
        assert_eq!(args.store_options().max_age, StoreOptions::default().max_age);
        assert_eq!(
            args.ingest_options().poll_timeout,
            IngestOptions::default().poll_timeout
        );
        assert_eq!(
            args.cadence_policy().cadence_for(11),
            CadencePolicy::default().cadence_for(11)
        );
    }

    #[test]
    fn max_age_must_be_positive_and_bounded() {
        let parse = |max_age: &str| {
            Args::try_parse_from([
                "larch",
                "--feed-file",
                "feed.ndjson",
                "--tiploc-csv",
                "tiplocs.csv",
                &format!("--max-age-minutes={max_age}"),
            ])
        };

        assert!(parse("0").is_err());
        assert!(parse("-5").is_err());
        assert!(parse("525601").is_err());
        assert!(parse("9223372036854775807").is_err());
        assert_eq!(
            parse("90").unwrap().store_options().max_age,
            chrono::Duration::minutes(90)
        );
    }

    #[test]
    fn one_feed_source_only() {
        assert!(
            Args::try_parse_from([
                "larch",
                "--feed-file",
                "a.ndjson",
                "--feed-url",
                "http://localhost/feed",
                "--tiploc-csv",
                "t.csv",
            ])
            .is_err()
        );
    }
}
