use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

pub type MetricsHandle = Arc<Mutex<FetchMetrics>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchMetrics {
    pub cache_hits: u64,
    pub network_successes: u64,
    pub browser_renders: u64,
    pub graduated_hits: u64,
    pub endpoints_graduated: u64,
    pub retries: u64,
    pub failures: u64,
    pub pages_opened: u64,
    pub blocked_resources: u64,
}

impl FetchMetrics {
    pub fn record_cache_hit(&mut self) {
        self.cache_hits = self.cache_hits.saturating_add(1);
    }

    pub fn record_network_success(&mut self) {
        self.network_successes = self.network_successes.saturating_add(1);
    }

    pub fn record_browser_render(&mut self) {
        self.browser_renders = self.browser_renders.saturating_add(1);
    }

    pub fn record_graduated_hit(&mut self) {
        self.graduated_hits = self.graduated_hits.saturating_add(1);
    }

    pub fn record_graduation(&mut self) {
        self.endpoints_graduated = self.endpoints_graduated.saturating_add(1);
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_blocked_resources(&mut self, count: u64) {
        self.blocked_resources = self.blocked_resources.saturating_add(count);
    }

    /// Share of fetches answered without launching a browser page.
    pub fn browserless_rate(&self) -> f64 {
        let browserless = self.cache_hits + self.network_successes + self.graduated_hits;
        let total = browserless + self.browser_renders;
        if total == 0 {
            0.0
        } else {
            (browserless as f64 / total as f64) * 100.0
        }
    }
}

pub fn new_handle() -> MetricsHandle {
    Arc::new(Mutex::new(FetchMetrics::default()))
}

pub fn record<F>(handle: &MetricsHandle, update: F)
where
    F: FnOnce(&mut FetchMetrics),
{
    let mut guard = handle.lock().unwrap_or_else(|poison| poison.into_inner());
    update(&mut guard);
}

pub fn snapshot(handle: &MetricsHandle) -> FetchMetrics {
    handle
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browserless_rate_counts_cheap_paths() {
        let handle = new_handle();
        record(&handle, |m| {
            m.record_cache_hit();
            m.record_network_success();
            m.record_graduated_hit();
            m.record_browser_render();
        });
        let metrics = snapshot(&handle);
        assert_eq!(metrics.browserless_rate(), 75.0);
        assert_eq!(FetchMetrics::default().browserless_rate(), 0.0);
    }
}
