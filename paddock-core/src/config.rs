use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PipelineConfig {
    pub browser: BrowserSection,
    pub rate_limit: RateLimitSection,
    pub cache: CacheSection,
    pub fetch: FetchSection,
    pub retry: RetrySection,
    pub extraction: ExtractionSection,
}

impl PipelineConfig {
    /// Applies `PADDOCK_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PADDOCK_BROWSER_ENABLED") {
            self.browser.enabled = parse_override("PADDOCK_BROWSER_ENABLED", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_BROWSER_HEADLESS") {
            self.browser.headless = parse_override("PADDOCK_BROWSER_HEADLESS", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_BROWSER_MAX_PAGES") {
            self.browser.max_pages = parse_override("PADDOCK_BROWSER_MAX_PAGES", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_BROWSER_EXECUTABLE") {
            self.browser.executable_path = Some(value);
        }
        if let Some(value) = lookup("PADDOCK_NAVIGATION_TIMEOUT_SECONDS") {
            self.browser.navigation_timeout_seconds =
                parse_override("PADDOCK_NAVIGATION_TIMEOUT_SECONDS", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_CACHE_DIR") {
            self.cache.directory = Some(value);
        }
        if let Some(value) = lookup("PADDOCK_CACHE_TTL_HOURS") {
            self.cache.ttl_hours = parse_override("PADDOCK_CACHE_TTL_HOURS", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_EXTRACTION_PROVIDER") {
            self.extraction.provider = parse_override("PADDOCK_EXTRACTION_PROVIDER", &value)?;
        }
        if let Some(value) = lookup("PADDOCK_EXTRACTION_MODEL") {
            self.extraction.model = value;
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::Override {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub enabled: bool,
    pub engine: String,
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub max_pages: usize,
    pub navigation_timeout_seconds: u64,
    pub ready_selector_timeout_seconds: u64,
    pub consent_grace_ms: u64,
    pub consent_texts: Vec<String>,
    pub settle_ms: u64,
    pub user_agent: Option<String>,
    pub lang: Option<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: "chromium".to_string(),
            executable_path: None,
            headless: true,
            sandbox: false,
            max_pages: 3,
            navigation_timeout_seconds: 30,
            ready_selector_timeout_seconds: 10,
            consent_grace_ms: 2000,
            consent_texts: ["Accept", "Accept All", "I Agree", "Allow", "Continue"]
                .iter()
                .map(|text| text.to_string())
                .collect(),
            settle_ms: 1500,
            user_agent: None,
            lang: Some("en-US".to_string()),
        }
    }
}

impl BrowserSection {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds.max(1))
    }

    pub fn ready_selector_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_selector_timeout_seconds)
    }

    pub fn consent_grace(&self) -> Duration {
        Duration::from_millis(self.consent_grace_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_requests_per_window: usize,
    pub window_seconds: u64,
    pub min_gap_seconds: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests_per_window: 3,
            window_seconds: 60,
            min_gap_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// On-disk cache location; the cache lives in memory when unset.
    pub directory: Option<String>,
    pub ttl_hours: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            directory: None,
            ttl_hours: 24,
        }
    }
}

impl CacheSection {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|dir| Path::new(dir).join("responses.sqlite"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub min_content_chars: usize,
    pub max_content_chars: usize,
    pub max_redirects: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            user_agent: "PaddockBot/1.0 (+schedule data collector)".to_string(),
            timeout_seconds: 30,
            min_content_chars: 1024,
            max_content_chars: 50_000,
            max_redirects: 5,
        }
    }
}

impl FetchSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub backoff_base_seconds: u64,
    pub jitter_seconds: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_seconds: 2,
            jitter_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionProvider {
    Gemini,
    Anthropic,
}

impl FromStr for ExtractionProvider {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(format!("unknown extraction provider {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub provider: ExtractionProvider,
    pub model: String,
    pub credential_env: String,
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_content_chars: usize,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            provider: ExtractionProvider::Gemini,
            model: "gemini-2.5-flash".to_string(),
            credential_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            timeout_seconds: 120,
            temperature: 0.1,
            max_output_tokens: 8192,
            max_content_chars: 50_000,
        }
    }
}

impl ExtractionSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/paddock.toml");
        let config = load_pipeline_config(path).expect("fixture config should parse");
        assert!(!config.browser.enabled);
        assert_eq!(config.browser.max_pages, 3);
        assert_eq!(config.rate_limit.max_requests_per_window, 3);
        assert_eq!(config.rate_limit.min_gap_seconds, 20);
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.extraction.provider, ExtractionProvider::Gemini);
        assert_eq!(config.extraction.credential_env, "GEMINI_API_KEY");
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.fetch.max_content_chars, 50_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.browser.consent_texts.len(), 5);
        assert!(config.cache.database_path().is_none());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = PipelineConfig::default();
        let env: HashMap<&str, &str> = [
            ("PADDOCK_BROWSER_ENABLED", "true"),
            ("PADDOCK_BROWSER_MAX_PAGES", "5"),
            ("PADDOCK_EXTRACTION_PROVIDER", "claude"),
            ("PADDOCK_CACHE_DIR", "/tmp/paddock"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|name| env.get(name).map(|value| value.to_string()))
            .unwrap();
        assert!(config.browser.enabled);
        assert_eq!(config.browser.max_pages, 5);
        assert_eq!(config.extraction.provider, ExtractionProvider::Anthropic);
        assert_eq!(
            config.cache.database_path(),
            Some(PathBuf::from("/tmp/paddock/responses.sqlite"))
        );
    }

    #[test]
    fn invalid_override_is_reported() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|name| (name == "PADDOCK_BROWSER_MAX_PAGES").then(|| "many".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Override { .. }));
    }
}
