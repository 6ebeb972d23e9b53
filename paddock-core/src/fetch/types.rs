use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::browser::DiscoveredEndpoint;

use super::cache::CacheKey;

#[derive(Debug, Error)]
#[error("invalid fetch request {url}: {reason}")]
pub struct InvalidRequest {
    pub url: String,
    pub reason: String,
}

/// A single page the caller wants fetched. Built once, never changed after
/// it is handed to the fetcher.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: Url,
    destination: String,
    ready_selector: Option<String>,
    resource_allow_list: Vec<String>,
    patterns: Vec<String>,
    cache_params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(url: &str) -> Result<Self, InvalidRequest> {
        let parsed = Url::parse(url.trim()).map_err(|err| InvalidRequest {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(InvalidRequest {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        let destination = destination_of(&parsed).ok_or_else(|| InvalidRequest {
            url: url.to_string(),
            reason: "url has no host".to_string(),
        })?;
        Ok(Self {
            url: parsed,
            destination,
            ready_selector: None,
            resource_allow_list: Vec::new(),
            patterns: Vec::new(),
            cache_params: BTreeMap::new(),
        })
    }

    pub fn with_destination_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        let hint = hint.trim();
        if !hint.is_empty() {
            self.destination = hint.to_ascii_lowercase();
        }
        self
    }

    pub fn with_ready_selector(mut self, selector: impl Into<String>) -> Self {
        self.ready_selector = Some(selector.into());
        self
    }

    pub fn allow_resource(mut self, substring: impl Into<String>) -> Self {
        self.resource_allow_list.push(substring.into().to_ascii_lowercase());
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(
            patterns
                .into_iter()
                .map(|pattern| pattern.into().to_ascii_lowercase())
                .filter(|pattern| !pattern.is_empty()),
        );
        self
    }

    /// Extraction-relevant parameter (for example the requested season) that
    /// separates cache entries for the same URL.
    pub fn with_cache_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cache_params.insert(name.into(), value.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ready_selector(&self) -> Option<&str> {
        self.ready_selector.as_deref()
    }

    pub fn resource_allow_list(&self) -> &[String] {
        &self.resource_allow_list
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn cache_params(&self) -> &BTreeMap<String, String> {
        &self.cache_params
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.url, &self.cache_params)
    }
}

/// Rate-limiting unit for a URL: lower-case host plus effective port.
pub fn destination_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    match url.port_or_known_default() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Html,
    Json,
    Text,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Json => "json",
            ContentKind::Text => "text",
        }
    }

    /// Classifies a body by its declared content type, sniffing the body when
    /// the header is missing or generic.
    pub fn classify(content_type: Option<&str>, body: &str) -> Self {
        let declared = content_type.map(|value| value.to_ascii_lowercase());
        match declared.as_deref() {
            Some(ct) if ct.contains("json") => ContentKind::Json,
            Some(ct) if ct.contains("html") || ct.contains("xml") => ContentKind::Html,
            Some(ct) if ct.starts_with("text/") => ContentKind::Text,
            _ => Self::sniff(body),
        }
    }

    fn sniff(body: &str) -> Self {
        let head = body.trim_start();
        if head.starts_with('{') || head.starts_with('[') {
            return ContentKind::Json;
        }
        let prefix: String = head.chars().take(512).collect::<String>().to_ascii_lowercase();
        if prefix.starts_with("<!doctype") || prefix.contains("<html") || prefix.contains("<body") {
            ContentKind::Html
        } else {
            ContentKind::Text
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(ContentKind::Html),
            "json" => Ok(ContentKind::Json),
            "text" => Ok(ContentKind::Text),
            other => Err(format!("unknown content kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Cache,
    Network,
    Browser,
    GraduatedEndpoint,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Cache => "cache",
            Provenance::Network => "network",
            Provenance::Browser => "browser",
            Provenance::GraduatedEndpoint => "graduated_endpoint",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTiming {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub status: u16,
    pub final_url: String,
    pub content: String,
    pub kind: ContentKind,
    pub provenance: Provenance,
    pub timing: FetchTiming,
    #[serde(default)]
    pub discovered_endpoints: Vec<DiscoveredEndpoint>,
    #[serde(default)]
    pub graduated_endpoint: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Keeps the first `max_chars` characters. Returns the number of characters
/// dropped when truncation happened.
pub fn truncate_prefix(content: &mut String, max_chars: usize) -> Option<usize> {
    let total = content.chars().count();
    if total <= max_chars {
        return None;
    }
    let cut = content
        .char_indices()
        .nth(max_chars)
        .map(|(index, _)| index)
        .unwrap_or(content.len());
    content.truncate(cut);
    Some(total - max_chars)
}
