use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::cancel::CancelSignal;

use super::error::BrowserResult;
use super::page::ObservedResponse;
use super::pool::{BrowserSessionPool, RenderRequest, RenderedPage};

const LATENCY_CEILING_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMatch {
    ContentType,
    Pattern,
}

/// A machine-readable endpoint observed behind a human-facing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEndpoint {
    pub url: String,
    pub content_type: Option<String>,
    pub score: f64,
    pub origin_url: String,
    pub latency_ms: u64,
    pub matched_by: EndpointMatch,
}

impl DiscoveredEndpoint {
    /// Only endpoints that declared a JSON or calendar type are graduated.
    pub fn is_graduation_candidate(&self) -> bool {
        self.matched_by == EndpointMatch::ContentType
    }
}

pub fn is_machine_readable(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("json") || lowered.contains("text/calendar")
}

/// The rendered page together with the endpoints seen while it loaded.
#[derive(Debug, Clone)]
pub struct Observation {
    pub page: RenderedPage,
    pub endpoints: Vec<DiscoveredEndpoint>,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointDiscovery;

impl EndpointDiscovery {
    pub fn new() -> Self {
        Self
    }

    /// Renders `request` once and ranks what the page fetched.
    pub async fn observe(
        &self,
        pool: &BrowserSessionPool,
        request: RenderRequest,
        patterns: &[String],
        cancel: &CancelSignal,
    ) -> BrowserResult<Observation> {
        let origin = request.url.clone();
        let page = pool.render(request, cancel).await?;
        let endpoints = self.rank(&origin, patterns, &page.observed);
        if let Some(top) = endpoints.first() {
            info!(
                origin = %origin,
                endpoint = %top.url,
                score = top.score,
                candidates = endpoints.len(),
                "Discovered data endpoint"
            );
        }
        Ok(Observation { page, endpoints })
    }

    pub async fn discover(
        &self,
        pool: &BrowserSessionPool,
        url: &str,
        patterns: &[String],
        cancel: &CancelSignal,
    ) -> BrowserResult<Vec<DiscoveredEndpoint>> {
        let observation = self
            .observe(pool, RenderRequest::new(url), patterns, cancel)
            .await?;
        Ok(observation.endpoints)
    }

    /// Orders candidate responses best first. Equal scores keep observation
    /// order.
    pub fn rank(
        &self,
        origin_url: &str,
        patterns: &[String],
        observed: &[ObservedResponse],
    ) -> Vec<DiscoveredEndpoint> {
        let origin = strip_fragment(origin_url);
        let patterns: Vec<String> = patterns
            .iter()
            .map(|pattern| pattern.to_ascii_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for response in observed {
            if !(200..300).contains(&response.status) {
                continue;
            }
            let url = strip_fragment(&response.url);
            if url == origin || !seen.insert(url.clone()) {
                continue;
            }
            let Ok(parsed) = Url::parse(&url) else {
                continue;
            };
            let path = parsed.path().to_ascii_lowercase();
            let query = parsed.query().unwrap_or_default().to_ascii_lowercase();

            let typed = response
                .mime_type
                .as_deref()
                .map(is_machine_readable)
                .unwrap_or(false);
            let in_segment = patterns.iter().any(|pattern| {
                path.split('/')
                    .any(|segment| !segment.is_empty() && segment.contains(pattern.as_str()))
            });
            let in_query = patterns.iter().any(|pattern| query.contains(pattern.as_str()));
            if !typed && !in_segment && !in_query {
                continue;
            }

            let mut score = 0.0;
            if typed {
                score += 4.0;
            }
            if in_segment {
                score += 2.0;
            } else if in_query {
                score += 1.0;
            }
            if path.contains("/api/") {
                score += 1.0;
            }
            if has_version_segment(&path) {
                score += 0.5;
            }
            let latency = response.latency_ms.min(LATENCY_CEILING_MS) as f64;
            score += 1.0 - latency / LATENCY_CEILING_MS as f64;

            candidates.push(DiscoveredEndpoint {
                url,
                content_type: response.mime_type.clone(),
                score,
                origin_url: origin_url.to_string(),
                latency_ms: response.latency_ms,
                matched_by: if typed {
                    EndpointMatch::ContentType
                } else {
                    EndpointMatch::Pattern
                },
            });
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        debug!(origin = %origin_url, candidates = candidates.len(), "Ranked endpoints");
        candidates
    }
}

fn strip_fragment(url: &str) -> String {
    match url.split_once('#') {
        Some((head, _)) => head.to_string(),
        None => url.to_string(),
    }
}

fn has_version_segment(path: &str) -> bool {
    path.split('/').any(|segment| {
        segment.len() > 1
            && segment.starts_with('v')
            && segment[1..].chars().all(|c| c.is_ascii_digit())
    })
}
