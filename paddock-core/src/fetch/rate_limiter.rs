use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::config::RateLimitSection;

use super::error::{FetchError, FetchOutcome};

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_per_window: usize,
    window: Duration,
    min_gap: Duration,
}

/// Sliding issuance history for one destination.
#[derive(Debug, Default)]
struct RateWindow {
    issued: VecDeque<Instant>,
    last: Option<Instant>,
}

impl RateWindow {
    fn ready_at(&self, now: Instant, limits: &Limits) -> Instant {
        let mut ready = now;
        if let Some(last) = self.last {
            ready = ready.max(last + limits.min_gap);
        }
        if self.issued.len() >= limits.max_per_window {
            let oldest = self.issued[self.issued.len() - limits.max_per_window];
            ready = ready.max(oldest + limits.window);
        }
        ready
    }

    fn record(&mut self, at: Instant, limits: &Limits) {
        self.issued.push_back(at);
        while self.issued.len() > limits.max_per_window {
            self.issued.pop_front();
        }
        self.last = Some(at);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub waited: Duration,
}

/// Per-destination request pacing. Callers for one destination queue in
/// arrival order; destinations never wait on each other.
#[derive(Debug)]
pub struct RateLimiter {
    limits: Limits,
    windows: Mutex<HashMap<String, Arc<AsyncMutex<RateWindow>>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitSection) -> Self {
        Self {
            limits: Limits {
                max_per_window: config.max_requests_per_window.max(1),
                window: Duration::from_secs(config.window_seconds),
                min_gap: Duration::from_secs(config.min_gap_seconds),
            },
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn window_for(&self, destination: &str) -> Arc<AsyncMutex<RateWindow>> {
        let key = destination.to_ascii_lowercase();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        Arc::clone(windows.entry(key).or_default())
    }

    /// Waits until a request to `destination` is permitted and records it.
    /// A cancelled wait records nothing.
    pub async fn admit(&self, destination: &str, cancel: &CancelSignal) -> FetchOutcome<Admission> {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled(destination));
        }
        let started = Instant::now();
        let window = self.window_for(destination);
        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled(destination)),
            guard = window.lock() => guard,
        };

        let ready = guard.ready_at(Instant::now(), &self.limits);
        if ready > Instant::now() {
            debug!(
                destination,
                wait_ms = (ready - Instant::now()).as_millis() as u64,
                "Pacing request"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::cancelled(destination)),
                _ = sleep_until(ready) => {}
            }
        }

        guard.record(Instant::now(), &self.limits);
        Ok(Admission {
            waited: started.elapsed(),
        })
    }
}
