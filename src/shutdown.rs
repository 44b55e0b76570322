// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use std::time::{Duration, Instant};
pub use tokio_util::sync::CancellationToken;

const WAKE_SLICE: Duration = Duration::from_millis(100);

/// Blocking sleep for threads outside the runtime that still has to notice
/// shutdown promptly. Returns `true` if cancelled before `duration` elapsed.
pub fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;

    loop {
        if token.is_cancelled() {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        std::thread::sleep(WAKE_SLICE.min(deadline - now));
    }
}

pub async fn cancel_on_ctrl_c(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("ctrl-c received, shutting down"),
        Err(e) => tracing::error!(error = %e, "could not listen for ctrl-c, shutting down"),
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion() {
        let token = CancellationToken::new();
        let started = Instant::now();
        assert!(!sleep_or_cancelled(&token, Duration::from_millis(150)));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn cancellation_wakes_sleep_early() {
        let token = CancellationToken::new();
        let canceller = token.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let started = Instant::now();
        assert!(sleep_or_cancelled(&token, Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
