use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::browser::{
    BlockingProfile, BrowserSessionPool, DiscoveredEndpoint, EndpointDiscovery, Observation,
    PageOptions, RenderRequest,
};
use crate::cancel::CancelSignal;
use crate::config::{FetchSection, PipelineConfig};

use super::cache::{CacheKey, CachedPayload, ResponseCache};
use super::error::{FetchError, FetchOutcome};
use super::metrics::{self, FetchMetrics, MetricsHandle};
use super::network::{NetworkClient, NetworkResponse};
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use super::types::{
    destination_of, truncate_prefix, ContentKind, FetchRequest, FetchResult, FetchTiming,
    Provenance,
};

/// An endpoint promoted to replace browser rendering for one logical target.
#[derive(Debug, Clone, Serialize)]
pub struct GraduatedEndpoint {
    pub target_url: String,
    pub endpoint_url: String,
    pub graduated_at: DateTime<Utc>,
}

/// Content produced by one strategy, before timing is attached.
#[derive(Debug)]
struct Retrieved {
    status: u16,
    final_url: String,
    content: String,
    kind: ContentKind,
    provenance: Provenance,
    discovered_endpoints: Vec<DiscoveredEndpoint>,
    graduated_endpoint: Option<String>,
    warnings: Vec<String>,
}

fn is_rejection(status: u16) -> bool {
    matches!(status, 401 | 403 | 429 | 451)
}

/// Network-first fetch orchestration: cache, graduated endpoint, plain
/// request, then browser rendering with endpoint discovery.
pub struct PageFetcher {
    settings: FetchSection,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    network: Arc<dyn NetworkClient>,
    pool: Option<Arc<BrowserSessionPool>>,
    discovery: EndpointDiscovery,
    retry: RetryPolicy,
    graduated: DashMap<CacheKey, GraduatedEndpoint>,
    metrics: MetricsHandle,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("browser", &self.pool.is_some())
            .field("retry", &self.retry)
            .field("graduated", &self.graduated.len())
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    pub fn new(
        config: &PipelineConfig,
        cache: Arc<ResponseCache>,
        network: Arc<dyn NetworkClient>,
    ) -> Self {
        Self {
            settings: config.fetch.clone(),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            cache,
            network,
            pool: None,
            discovery: EndpointDiscovery::new(),
            retry: RetryPolicy::new(&config.retry),
            graduated: DashMap::new(),
            metrics: metrics::new_handle(),
        }
    }

    /// Enables the browser fallback. The pool reports into this fetcher's
    /// metrics.
    pub fn with_browser(mut self, pool: BrowserSessionPool) -> Self {
        self.pool = Some(Arc::new(pool.with_metrics(Arc::clone(&self.metrics))));
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn browser_enabled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pool(&self) -> Option<&Arc<BrowserSessionPool>> {
        self.pool.as_ref()
    }

    pub fn metrics(&self) -> FetchMetrics {
        metrics::snapshot(&self.metrics)
    }

    pub fn metrics_handle(&self) -> MetricsHandle {
        Arc::clone(&self.metrics)
    }

    /// Seeds a known endpoint for `request` so the browser is skipped.
    pub fn graduate(&self, request: &FetchRequest, endpoint_url: &str) {
        self.graduated.insert(
            request.cache_key(),
            GraduatedEndpoint {
                target_url: request.url().to_string(),
                endpoint_url: endpoint_url.to_string(),
                graduated_at: Utc::now(),
            },
        );
    }

    pub fn graduated_endpoints(&self) -> Vec<GraduatedEndpoint> {
        let mut endpoints: Vec<_> = self
            .graduated
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        endpoints.sort_by(|a, b| a.target_url.cmp(&b.target_url));
        endpoints
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancelSignal,
    ) -> FetchOutcome<FetchResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "fetch",
            %request_id,
            url = %request.url(),
            destination = request.destination()
        );
        self.fetch_inner(request, cancel).instrument(span).await
    }

    async fn fetch_inner(
        &self,
        request: &FetchRequest,
        cancel: &CancelSignal,
    ) -> FetchOutcome<FetchResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let key = request.cache_key();

        match self.cache.get(&key) {
            Ok(Some(entry)) => {
                metrics::record(&self.metrics, |m| m.record_cache_hit());
                info!(cache_key = %key, "Served from cache");
                let payload = entry.payload;
                return Ok(self.cap(FetchResult {
                    status: payload.status,
                    final_url: payload.final_url,
                    content: payload.content,
                    kind: payload.kind,
                    provenance: Provenance::Cache,
                    timing: FetchTiming {
                        started_at,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        attempts: 0,
                    },
                    discovered_endpoints: Vec::new(),
                    graduated_endpoint: None,
                    warnings: Vec::new(),
                }));
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Cache read failed; fetching"),
        }

        let key_ref = &key;
        let outcome = self
            .retry
            .run(request.url().as_str(), cancel, &self.metrics, |attempt| {
                self.attempt(request, key_ref, attempt, cancel)
            })
            .await?;
        let retrieved = outcome.result;

        if let Err(err) = self.cache.put(
            &key,
            CachedPayload {
                content: retrieved.content.clone(),
                kind: retrieved.kind,
                status: retrieved.status,
                final_url: retrieved.final_url.clone(),
            },
        ) {
            warn!(error = %err, "Cache write failed");
        }

        info!(
            provenance = retrieved.provenance.as_str(),
            attempts = outcome.attempts,
            chars = retrieved.content.len(),
            "Fetch complete"
        );
        Ok(self.cap(FetchResult {
            status: retrieved.status,
            final_url: retrieved.final_url,
            content: retrieved.content,
            kind: retrieved.kind,
            provenance: retrieved.provenance,
            timing: FetchTiming {
                started_at,
                elapsed_ms: started.elapsed().as_millis() as u64,
                attempts: outcome.attempts,
            },
            discovered_endpoints: retrieved.discovered_endpoints,
            graduated_endpoint: retrieved.graduated_endpoint,
            warnings: retrieved.warnings,
        }))
    }

    fn cap(&self, mut result: FetchResult) -> FetchResult {
        let limit = self.settings.max_content_chars;
        if let Some(dropped) = truncate_prefix(&mut result.content, limit) {
            warn!(limit, dropped, "Truncated fetched content");
            result.warnings.push(format!(
                "content truncated to the first {limit} characters ({dropped} dropped)"
            ));
        }
        result
    }

    /// One pass over the strategy sequence.
    async fn attempt(
        &self,
        request: &FetchRequest,
        key: &CacheKey,
        attempt: usize,
        cancel: &CancelSignal,
    ) -> FetchOutcome<Retrieved> {
        let profile = self.retry.profile_for(attempt);
        let mut last_error = None;

        let graduated = self.graduated.get(key).map(|entry| entry.value().clone());
        if let Some(endpoint) = graduated {
            match self.fetch_endpoint(&endpoint.endpoint_url, cancel).await {
                Ok(retrieved) => {
                    metrics::record(&self.metrics, |m| m.record_graduated_hit());
                    return Ok(retrieved);
                }
                Err(err @ FetchError::RateLimitCancelled { .. }) => return Err(err),
                Err(err) => {
                    warn!(
                        endpoint = %endpoint.endpoint_url,
                        error = %err,
                        "Graduated endpoint failed; falling back to discovery"
                    );
                    self.graduated.remove(key);
                    last_error = Some(err);
                }
            }
        }

        match self.fetch_plain(request, cancel).await {
            Ok(retrieved) => {
                metrics::record(&self.metrics, |m| m.record_network_success());
                return Ok(retrieved);
            }
            Err(err) if err.skips_browser() => return Err(err),
            Err(err) => {
                debug!(error = %err, "Plain request not usable");
                last_error = Some(err);
            }
        }

        let Some(pool) = self.pool.as_ref() else {
            return Err(last_error.unwrap_or(FetchError::BrowserDisabled));
        };
        self.fetch_rendered(pool, request, key, profile, cancel).await
    }

    async fn get_bounded(&self, url: &str, cancel: &CancelSignal) -> FetchOutcome<NetworkResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::cancelled("network response")),
            response = timeout(self.settings.timeout(), self.network.get(url)) => {
                response.map_err(|_| FetchError::Timeout(format!("GET {url}")))?
            }
        }
    }

    async fn fetch_plain(
        &self,
        request: &FetchRequest,
        cancel: &CancelSignal,
    ) -> FetchOutcome<Retrieved> {
        self.limiter.admit(request.destination(), cancel).await?;
        let url = request.url().as_str();
        let response = self.get_bounded(url, cancel).await?;
        let status = response.status;
        if is_rejection(status) {
            return Err(FetchError::Blocked {
                url: url.to_string(),
                status,
            });
        }
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let kind = ContentKind::classify(response.content_type.as_deref(), &response.body);
        let chars = response.body.trim().chars().count();
        let trivial = match kind {
            ContentKind::Json => chars == 0,
            _ => chars < self.settings.min_content_chars,
        };
        if trivial {
            return Err(FetchError::UnusableContent {
                url: url.to_string(),
                reason: format!("only {chars} characters; likely a script-rendered shell"),
            });
        }
        Ok(Retrieved {
            status,
            final_url: response.final_url,
            content: response.body,
            kind,
            provenance: Provenance::Network,
            discovered_endpoints: Vec::new(),
            graduated_endpoint: None,
            warnings: Vec::new(),
        })
    }

    /// Direct request to a discovered or graduated endpoint.
    async fn fetch_endpoint(&self, url: &str, cancel: &CancelSignal) -> FetchOutcome<Retrieved> {
        let parsed = Url::parse(url).map_err(|err| FetchError::UnusableContent {
            url: url.to_string(),
            reason: format!("invalid endpoint url: {err}"),
        })?;
        let destination = destination_of(&parsed).ok_or_else(|| FetchError::UnusableContent {
            url: url.to_string(),
            reason: "endpoint url has no host".to_string(),
        })?;
        self.limiter.admit(&destination, cancel).await?;
        let response = self.get_bounded(url, cancel).await?;
        let status = response.status;
        if is_rejection(status) {
            return Err(FetchError::Blocked {
                url: url.to_string(),
                status,
            });
        }
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let kind = ContentKind::classify(response.content_type.as_deref(), &response.body);
        let unexpected = match kind {
            ContentKind::Json => serde_json::from_str::<serde_json::Value>(&response.body)
                .err()
                .map(|err| format!("malformed JSON: {err}")),
            ContentKind::Html => Some("endpoint now serves an HTML page".to_string()),
            ContentKind::Text if response.body.trim().is_empty() => {
                Some("empty body".to_string())
            }
            ContentKind::Text => None,
        };
        if let Some(reason) = unexpected {
            return Err(FetchError::UnusableContent {
                url: url.to_string(),
                reason,
            });
        }
        Ok(Retrieved {
            status,
            final_url: response.final_url,
            content: response.body,
            kind,
            provenance: Provenance::GraduatedEndpoint,
            discovered_endpoints: Vec::new(),
            graduated_endpoint: Some(url.to_string()),
            warnings: Vec::new(),
        })
    }

    async fn fetch_rendered(
        &self,
        pool: &BrowserSessionPool,
        request: &FetchRequest,
        key: &CacheKey,
        profile: BlockingProfile,
        cancel: &CancelSignal,
    ) -> FetchOutcome<Retrieved> {
        self.limiter.admit(request.destination(), cancel).await?;
        let render = RenderRequest {
            url: request.url().to_string(),
            ready_selector: request.ready_selector().map(str::to_string),
            options: PageOptions {
                profile,
                allow_list: request.resource_allow_list().to_vec(),
            },
        };
        let Observation { page, endpoints } = self
            .discovery
            .observe(pool, render, request.patterns(), cancel)
            .await?;
        metrics::record(&self.metrics, |m| m.record_browser_render());

        if let Some(top) = endpoints.first().filter(|top| top.is_graduation_candidate()) {
            match self.fetch_endpoint(&top.url, cancel).await {
                Ok(mut retrieved) => {
                    self.graduated.insert(
                        key.clone(),
                        GraduatedEndpoint {
                            target_url: request.url().to_string(),
                            endpoint_url: top.url.clone(),
                            graduated_at: Utc::now(),
                        },
                    );
                    metrics::record(&self.metrics, |m| m.record_graduation());
                    info!(endpoint = %top.url, score = top.score, "Graduated data endpoint");
                    retrieved.warnings.extend(page.warnings);
                    retrieved.discovered_endpoints = endpoints;
                    return Ok(retrieved);
                }
                Err(err @ FetchError::RateLimitCancelled { .. }) => return Err(err),
                Err(err) => {
                    debug!(endpoint = %top.url, error = %err, "Endpoint not usable; keeping rendered page");
                }
            }
        }

        let url = request.url().as_str();
        if let Some(status) = page.status {
            if is_rejection(status) {
                return Err(FetchError::Blocked {
                    url: url.to_string(),
                    status,
                });
            }
            if status >= 400 {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }
        }
        if page.content.trim().is_empty() {
            return Err(FetchError::UnusableContent {
                url: url.to_string(),
                reason: "rendered page is empty".to_string(),
            });
        }
        Ok(Retrieved {
            status: page.status.unwrap_or(200),
            final_url: page.final_url,
            content: page.content,
            kind: ContentKind::Html,
            provenance: Provenance::Browser,
            discovered_endpoints: endpoints,
            graduated_endpoint: None,
            warnings: page.warnings,
        })
    }

    /// Renders `request` once and reports the endpoints the page used.
    pub async fn discover(
        &self,
        request: &FetchRequest,
        cancel: &CancelSignal,
    ) -> FetchOutcome<Vec<DiscoveredEndpoint>> {
        let pool = self.pool.as_ref().ok_or(FetchError::BrowserDisabled)?;
        self.limiter.admit(request.destination(), cancel).await?;
        let render = RenderRequest {
            url: request.url().to_string(),
            ready_selector: request.ready_selector().map(str::to_string),
            options: PageOptions {
                profile: BlockingProfile::Standard,
                allow_list: request.resource_allow_list().to_vec(),
            },
        };
        let observation = self
            .discovery
            .observe(pool, render, request.patterns(), cancel)
            .await?;
        Ok(observation.endpoints)
    }
}
