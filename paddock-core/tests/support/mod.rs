#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::time::{sleep, Instant};

use paddock_core::browser::consent::matches_consent_text;
use paddock_core::browser::{
    BlockingProfile, BrowserPage, BrowserResult, ObservedResponse, PageFactory, PageOptions,
    PageTraffic,
};
use paddock_core::fetch::{FetchOutcome, MemoryCacheStore, NetworkClient, NetworkResponse, ResponseCache};
use paddock_core::{ManualClock, PipelineConfig};

/// Config with the browser's waits switched off so tests only see pacing,
/// timeouts and backoff.
pub fn quick_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.browser.enabled = true;
    config.browser.settle_ms = 0;
    config.browser.consent_grace_ms = 0;
    config
}

pub fn memory_cache(config: &PipelineConfig) -> (Arc<ResponseCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    ));
    let cache = ResponseCache::new(
        Arc::new(MemoryCacheStore::new()),
        config.cache.ttl(),
        clock.clone(),
    );
    (Arc::new(cache), clock)
}

pub fn html_page(chars: usize) -> String {
    let mut body = String::from("<html><body><table id=\"schedule\">");
    while body.len() < chars {
        body.push_str("<tr><td>Round</td><td>Circuit</td><td>Date</td></tr>");
    }
    body.push_str("</table></body></html>");
    body
}

pub const JS_SHELL: &str = "<html><body><div id=\"app\"></div><script src=\"/app.js\"></script></body></html>";

#[derive(Debug, Clone)]
pub enum Reply {
    Page {
        status: u16,
        content_type: Option<String>,
        body: String,
    },
    Hang,
}

/// Plain-HTTP stand-in answering from a per-URL script.
#[derive(Default)]
pub struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, url: &str, status: u16, content_type: &str, body: impl Into<String>) {
        self.replies.lock().unwrap().insert(
            url.to_string(),
            Reply::Page {
                status,
                content_type: Some(content_type.to_string()),
                body: body.into(),
            },
        );
    }

    pub fn hang(&self, url: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Hang);
    }

    pub fn calls_to(&self, url: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == url)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NetworkClient for ScriptedNetwork {
    async fn get(&self, url: &str) -> FetchOutcome<NetworkResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let reply = self.replies.lock().unwrap().get(url).cloned();
        match reply {
            Some(Reply::Page {
                status,
                content_type,
                body,
            }) => Ok(NetworkResponse {
                status,
                final_url: url.to_string(),
                content_type,
                body,
                elapsed: Duration::from_millis(5),
            }),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(NetworkResponse {
                status: 404,
                final_url: url.to_string(),
                content_type: Some("text/html".into()),
                body: "not found".into(),
                elapsed: Duration::from_millis(5),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    pub status: Option<u16>,
    pub html: String,
    pub responses: Vec<ObservedResponse>,
    pub consent_button: Option<String>,
}

pub fn observed(url: &str, mime: &str, latency_ms: u64) -> ObservedResponse {
    ObservedResponse {
        url: url.to_string(),
        status: 200,
        mime_type: Some(mime.to_string()),
        resource_type: Some("XHR".to_string()),
        latency_ms,
    }
}

/// Browser stand-in that tracks how many pages are open at once.
#[derive(Default)]
pub struct FakeBrowser {
    sites: Arc<Mutex<HashMap<String, FakeSite>>>,
    hold: Duration,
    open_delay: Duration,
    opened: AtomicUsize,
    open_now: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    profiles: Mutex<Vec<BlockingProfile>>,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every navigation takes `hold` to complete.
    pub fn holding(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            ..Self::default()
        })
    }

    /// Opening a page takes `delay`.
    pub fn slow_to_open(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open_delay: delay,
            ..Self::default()
        })
    }

    pub fn site(&self, url: &str, site: FakeSite) {
        self.sites.lock().unwrap().insert(url.to_string(), site);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn profiles(&self) -> Vec<BlockingProfile> {
        self.profiles.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFactory for FakeBrowser {
    async fn open(&self, options: &PageOptions) -> BrowserResult<Box<dyn BrowserPage>> {
        if !self.open_delay.is_zero() {
            sleep(self.open_delay).await;
        }
        self.profiles.lock().unwrap().push(options.profile);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            sites: Arc::clone(&self.sites),
            hold: self.hold,
            current: None,
            open_now: Arc::clone(&self.open_now),
        }))
    }
}

struct FakePage {
    sites: Arc<Mutex<HashMap<String, FakeSite>>>,
    hold: Duration,
    current: Option<String>,
    open_now: Arc<AtomicUsize>,
}

impl FakePage {
    fn current_site(&self) -> FakeSite {
        self.current
            .as_ref()
            .and_then(|url| self.sites.lock().unwrap().get(url).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&mut self, url: &str) -> BrowserResult<Option<u16>> {
        if !self.hold.is_zero() {
            sleep(self.hold).await;
        }
        self.current = Some(url.to_string());
        Ok(self.current_site().status.or(Some(200)))
    }

    async fn wait_for_selector(&mut self, _selector: &str) -> BrowserResult<()> {
        Ok(())
    }

    async fn click_consent(&mut self, texts: &[String]) -> BrowserResult<Option<String>> {
        Ok(self
            .current_site()
            .consent_button
            .and_then(|button| matches_consent_text(&button, texts)))
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.current_site().html)
    }

    async fn final_url(&mut self) -> BrowserResult<String> {
        Ok(self.current.clone().unwrap_or_default())
    }

    fn take_traffic(&mut self) -> PageTraffic {
        PageTraffic {
            responses: self.current_site().responses,
            blocked_requests: 0,
        }
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.open_now.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
