use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::config::BrowserSection;
use crate::fetch::metrics::{self, MetricsHandle};

use super::consent;
use super::error::{BrowserError, BrowserResult};
use super::page::{BrowserPage, ObservedResponse, PageFactory, PageOptions};

/// What to render and how.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub ready_selector: Option<String>,
    pub options: PageOptions,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ready_selector: None,
            options: PageOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub status: Option<u16>,
    pub final_url: String,
    pub content: String,
    pub observed: Vec<ObservedResponse>,
    pub blocked_requests: u64,
    pub consent_clicked: Option<String>,
    pub warnings: Vec<String>,
}

/// Holds a checked-out page and its pool slot. Dropping the lease without
/// `release` closes the page in the background and frees the slot after.
struct PageLease {
    page: Option<Box<dyn BrowserPage>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PageLease {
    async fn release(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                debug!(error = %err, "Page close failed");
            }
        }
        self.permit.take();
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = page.close().await {
                        debug!(error = %err, "Page close after abandoned lease failed");
                    }
                    drop(permit);
                });
            }
            Err(_) => {
                warn!("Page lease dropped outside a runtime; page not closed");
            }
        }
    }
}

/// Bounded set of browser pages shared by every destination.
pub struct BrowserSessionPool {
    factory: Arc<dyn PageFactory>,
    slots: Arc<Semaphore>,
    max_pages: usize,
    config: BrowserSection,
    metrics: MetricsHandle,
}

impl std::fmt::Debug for BrowserSessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSessionPool")
            .field("max_pages", &self.max_pages)
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

impl BrowserSessionPool {
    pub fn new(factory: Arc<dyn PageFactory>, config: &BrowserSection) -> Self {
        let max_pages = config.max_pages.max(1);
        Self {
            factory,
            slots: Arc::new(Semaphore::new(max_pages)),
            max_pages,
            config: config.clone(),
            metrics: metrics::new_handle(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn in_use(&self) -> usize {
        self.max_pages - self.slots.available_permits()
    }

    /// Checks out a page, runs `f` on it and closes it on every exit path.
    /// Waiting for a slot is bounded by the navigation timeout and aborts on
    /// cancellation without taking a slot.
    pub async fn with_page<T, F>(
        &self,
        options: &PageOptions,
        cancel: &CancelSignal,
        f: F,
    ) -> BrowserResult<T>
    where
        F: for<'p> FnOnce(&'p mut Box<dyn BrowserPage>) -> BoxFuture<'p, BrowserResult<T>>,
    {
        if cancel.is_cancelled() {
            return Err(BrowserError::Cancelled("browser page slot".into()));
        }
        let slot_timeout = self.config.navigation_timeout();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BrowserError::Cancelled("browser page slot".into()));
            }
            acquired = timeout(slot_timeout, Arc::clone(&self.slots).acquire_owned()) => {
                match acquired {
                    Err(_) => return Err(BrowserError::Timeout("browser page slot".into())),
                    Ok(Err(_)) => return Err(BrowserError::Unexpected("browser pool closed".into())),
                    Ok(Ok(permit)) => permit,
                }
            }
        };

        // Detached: a page that finishes opening after the caller left is
        // still closed, and only then is its slot returned.
        let factory = Arc::clone(&self.factory);
        let open_options = options.clone();
        let (opened_tx, opened_rx) = oneshot::channel();
        tokio::spawn(async move {
            let lease = factory.open(&open_options).await.map(|page| PageLease {
                page: Some(page),
                permit: Some(permit),
            });
            if let Err(Ok(unclaimed)) = opened_tx.send(lease) {
                debug!("Page opened after its caller left; closing");
                unclaimed.release().await;
            }
        });

        let mut lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BrowserError::Cancelled("browser page open".into()));
            }
            opened = timeout(slot_timeout, opened_rx) => {
                match opened {
                    Err(_) => return Err(BrowserError::Timeout("browser page open".into())),
                    Ok(Err(_)) => return Err(BrowserError::Unexpected("page open task ended".into())),
                    Ok(Ok(lease)) => lease?,
                }
            }
        };
        metrics::record(&self.metrics, |m| m.record_page_open());

        let result = match lease.page.as_mut() {
            Some(page) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(BrowserError::Cancelled("browser page".into())),
                    result = f(page) => result,
                }
            }
            None => Err(BrowserError::Unexpected("page lease empty".into())),
        };
        lease.release().await;
        result
    }

    /// Navigates, waits for the ready selector, dismisses consent dialogs and
    /// lets late requests settle before reading the DOM.
    pub async fn render(
        &self,
        request: RenderRequest,
        cancel: &CancelSignal,
    ) -> BrowserResult<RenderedPage> {
        let navigation_timeout = self.config.navigation_timeout();
        let ready_timeout = self.config.ready_selector_timeout();
        let consent_texts = self.config.consent_texts.clone();
        let consent_grace = self.config.consent_grace();
        let settle = self.config.settle();
        let options = request.options.clone();

        let rendered = self
            .with_page(&options, cancel, move |page| {
                Box::pin(async move {
                    let mut warnings = Vec::new();
                    let status = timeout(navigation_timeout, page.goto(&request.url))
                        .await
                        .map_err(|_| BrowserError::Timeout(format!("navigation to {}", request.url)))??;

                    if let Some(selector) = request.ready_selector.as_deref() {
                        match timeout(ready_timeout, page.wait_for_selector(selector)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => warnings.push(format!(
                                "ready selector {selector} could not be checked: {err}"
                            )),
                            Err(_) => warnings.push(format!(
                                "ready selector {selector} did not appear within {}s",
                                ready_timeout.as_secs()
                            )),
                        }
                    }

                    let consent_clicked =
                        consent::dismiss_consent(page.as_mut(), &consent_texts, consent_grace).await;
                    if !settle.is_zero() {
                        sleep(settle).await;
                    }

                    let content = page.content().await?;
                    let final_url = page
                        .final_url()
                        .await
                        .unwrap_or_else(|_| request.url.clone());
                    let traffic = page.take_traffic();
                    Ok(RenderedPage {
                        status,
                        final_url,
                        content,
                        observed: traffic.responses,
                        blocked_requests: traffic.blocked_requests,
                        consent_clicked,
                        warnings,
                    })
                })
            })
            .await?;

        metrics::record(&self.metrics, |m| {
            m.record_blocked_resources(rendered.blocked_requests)
        });
        debug!(
            url = %rendered.final_url,
            observed = rendered.observed.len(),
            blocked = rendered.blocked_requests,
            "Rendered page"
        );
        Ok(rendered)
    }
}
