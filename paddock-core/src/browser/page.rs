use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::blocking::BlockingProfile;
use super::error::BrowserResult;

/// A network response seen while a page was loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
    pub mime_type: Option<String>,
    pub resource_type: Option<String>,
    pub latency_ms: u64,
}

/// Everything a page observed since navigation started.
#[derive(Debug, Clone, Default)]
pub struct PageTraffic {
    pub responses: Vec<ObservedResponse>,
    pub blocked_requests: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    pub profile: BlockingProfile,
    /// Resource-type or URL substrings that must never be blocked.
    pub allow_list: Vec<String>,
}

/// One checked-out browser tab.
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigates and returns the main document status when known.
    async fn goto(&mut self, url: &str) -> BrowserResult<Option<u16>>;

    /// Resolves once `selector` matches. Callers bound it with a timeout.
    async fn wait_for_selector(&mut self, selector: &str) -> BrowserResult<()>;

    /// Clicks the first visible button or link whose text matches one of
    /// `texts`. Returns the matched text.
    async fn click_consent(&mut self, texts: &[String]) -> BrowserResult<Option<String>>;

    async fn content(&mut self) -> BrowserResult<String>;

    async fn final_url(&mut self) -> BrowserResult<String>;

    fn take_traffic(&mut self) -> PageTraffic;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait]
pub trait PageFactory: Send + Sync {
    /// Opens a fresh page with resource blocking and response observation
    /// installed.
    async fn open(&self, options: &PageOptions) -> BrowserResult<Box<dyn BrowserPage>>;
}
