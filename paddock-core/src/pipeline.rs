use std::sync::Arc;

use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::browser::{
    BrowserError, BrowserSessionPool, ChromiumLauncher, ChromiumPageFactory, DiscoveredEndpoint,
};
use crate::cancel::CancelSignal;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::extraction::{
    ExtractionCandidate, ExtractionContext, ExtractionError, ExtractionRequest, ExtractionService,
};
use crate::fetch::{
    CacheError, ContentKind, FetchError, FetchMetrics, FetchRequest, FetchResult, InvalidRequest,
    PageFetcher, Provenance, ReqwestNetworkClient, ResponseCache,
};
use crate::schedule::{
    ExtractionMethod, RecordSource, SchemaValidator, ValidatedRecord, ValidationFailure,
    ValidationWarning,
};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Request(#[from] InvalidRequest),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Request(_) => "invalid_request",
            PipelineError::Fetch(err) => err.kind().as_str(),
            PipelineError::Extraction(err) => err.kind().as_str(),
            PipelineError::Validation(_) => "validation_failure",
            PipelineError::Cache(_) => "cache",
            PipelineError::Browser(_) => "browser",
            PipelineError::Config(_) => "config",
        }
    }

    pub fn operator_message(&self) -> String {
        match self {
            PipelineError::Fetch(err) => err.operator_message(),
            PipelineError::Extraction(err) => err.operator_message(),
            PipelineError::Validation(failure) => format!(
                "The extracted schedule did not pass validation ({} issue(s)): {}",
                failure.issues.len(),
                failure
                    .issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            other => other.to_string(),
        }
    }
}

/// Builds the fetch half of the pipeline: cache, plain client and, when
/// enabled, a Chromium-backed page pool.
pub fn fetcher_from_config(config: &PipelineConfig) -> PipelineResult<PageFetcher> {
    let cache = ResponseCache::from_config(&config.cache, Arc::new(SystemClock))?;
    let network = ReqwestNetworkClient::new(&config.fetch)?;
    let fetcher = PageFetcher::new(config, Arc::new(cache), Arc::new(network));
    if !config.browser.enabled {
        return Ok(fetcher);
    }
    let launcher = ChromiumLauncher::new(config.browser.clone())?;
    let factory = ChromiumPageFactory::new(launcher);
    let pool = BrowserSessionPool::new(Arc::new(factory), &config.browser);
    Ok(fetcher.with_browser(pool))
}

fn method_for(provenance: Provenance) -> ExtractionMethod {
    match provenance {
        Provenance::Cache => ExtractionMethod::Cache,
        Provenance::Network => ExtractionMethod::Http,
        Provenance::Browser => ExtractionMethod::Browser,
        Provenance::GraduatedEndpoint => ExtractionMethod::GraduatedEndpoint,
    }
}

/// Fetch, extract, validate. Hands back validated records or typed failures.
pub struct SchedulePipeline {
    fetcher: PageFetcher,
    extraction: ExtractionService,
    validator: SchemaValidator,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SchedulePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulePipeline")
            .field("fetcher", &self.fetcher)
            .field("extraction", &self.extraction)
            .finish_non_exhaustive()
    }
}

impl SchedulePipeline {
    pub fn new(fetcher: PageFetcher, extraction: ExtractionService) -> Self {
        Self {
            fetcher,
            extraction,
            validator: SchemaValidator::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let fetcher = fetcher_from_config(config)?;
        let extraction = ExtractionService::from_config(&config.extraction)?;
        Ok(Self::new(fetcher, extraction))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    pub fn metrics(&self) -> FetchMetrics {
        self.fetcher.metrics()
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancelSignal,
    ) -> PipelineResult<FetchResult> {
        Ok(self.fetcher.fetch(request, cancel).await?)
    }

    pub async fn discover(
        &self,
        request: &FetchRequest,
        cancel: &CancelSignal,
    ) -> PipelineResult<Vec<DiscoveredEndpoint>> {
        Ok(self.fetcher.discover(request, cancel).await?)
    }

    /// Fetches `request`, extracts a schedule from it and validates the result.
    pub async fn acquire(
        &self,
        request: &FetchRequest,
        mut context: ExtractionContext,
        cancel: &CancelSignal,
    ) -> PipelineResult<ValidatedRecord> {
        let span = info_span!("acquire", url = %request.url());
        async move {
            let fetched = self.fetcher.fetch(request, cancel).await?;
            if context.source_url.is_none() {
                context.source_url = Some(fetched.final_url.clone());
            }
            let source = RecordSource {
                url: request.url().to_string(),
                provider: request.destination().to_string(),
                retrieved_at: fetched.timing.started_at,
                extraction_method: method_for(fetched.provenance),
                discovered_endpoints: fetched
                    .discovered_endpoints
                    .iter()
                    .map(|endpoint| endpoint.url.clone())
                    .collect(),
            };
            let extraction_request =
                ExtractionRequest::new(fetched.content, fetched.kind).with_context(context);
            let candidate = self.extraction.extract(&extraction_request).await?;
            self.finish(candidate, fetched.warnings, source)
        }
        .instrument(span)
        .await
    }

    /// Runs extraction and validation over content the caller already holds,
    /// such as an uploaded document.
    pub async fn ingest_document(
        &self,
        content: impl Into<String>,
        kind: ContentKind,
        context: ExtractionContext,
    ) -> PipelineResult<ValidatedRecord> {
        let source = RecordSource {
            url: context
                .source_url
                .clone()
                .unwrap_or_else(|| "document".to_string()),
            provider: "document".to_string(),
            retrieved_at: self.clock.now(),
            extraction_method: ExtractionMethod::Document,
            discovered_endpoints: Vec::new(),
        };
        let request = ExtractionRequest::new(content, kind).with_context(context);
        let candidate = self.extraction.extract(&request).await?;
        self.finish(candidate, Vec::new(), source)
    }

    fn finish(
        &self,
        candidate: ExtractionCandidate,
        fetch_warnings: Vec<String>,
        source: RecordSource,
    ) -> PipelineResult<ValidatedRecord> {
        let mut record = match self.validator.validate(&candidate) {
            Ok(record) => record,
            Err(failure) => {
                warn!(
                    issues = failure.issues.len(),
                    provider = %candidate.provider,
                    "Extraction output rejected"
                );
                return Err(failure.into());
            }
        };
        let fetch_warnings = fetch_warnings.into_iter().map(|message| ValidationWarning {
            path: "fetch".to_string(),
            message,
        });
        record.warnings.splice(0..0, fetch_warnings);
        info!(
            series = %record.series.name,
            season = record.series.season,
            events = record.series.events.len(),
            sessions = record.series.session_count(),
            warnings = record.warnings.len(),
            method = %source.extraction_method,
            "Schedule validated"
        );
        Ok(record.with_source(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ExtractionSection;
    use crate::extraction::{ExtractionBackend, ExtractionPrompt, ExtractionResult};
    use crate::fetch::{MemoryCacheStore, NetworkClient, NetworkResponse};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct Unreachable;

    #[async_trait]
    impl NetworkClient for Unreachable {
        async fn get(&self, url: &str) -> crate::fetch::FetchOutcome<NetworkResponse> {
            Err(FetchError::Network {
                url: url.to_string(),
                message: "offline".into(),
            })
        }
    }

    struct Canned(&'static str);

    #[async_trait]
    impl ExtractionBackend for Canned {
        fn provider(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "fixture"
        }

        async fn complete(&self, _prompt: &ExtractionPrompt) -> ExtractionResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn pipeline(answer: &'static str) -> SchedulePipeline {
        let config = PipelineConfig::default();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let cache = ResponseCache::new(
            Arc::new(MemoryCacheStore::new()),
            config.cache.ttl(),
            clock.clone(),
        );
        let fetcher = PageFetcher::new(&config, Arc::new(cache), Arc::new(Unreachable));
        let extraction = ExtractionService::new(Arc::new(Canned(answer)), ExtractionSection::default());
        SchedulePipeline::new(fetcher, extraction).with_clock(clock)
    }

    #[tokio::test]
    async fn ingest_document_attaches_document_source() {
        let answer = r#"Here you go:
```json
{"series": {"name": "MotoGP", "season": 2025, "category": "MOTORCYCLE",
  "events": [{"name": "Qatar GP", "start_date": "2025-04-11", "end_date": "2025-04-13",
    "venue": {"country": "Qatar", "city": "Lusail"},
    "sessions": [{"name": "Race", "type": "RACE", "start": "2025-04-13T20:00:00+03:00"}]}]}}
```"#;
        let context = ExtractionContext {
            source_url: Some("file:///calendar.pdf".into()),
            ..ExtractionContext::default()
        };
        let record = pipeline(answer)
            .ingest_document("MotoGP 2025 calendar ...", ContentKind::Text, context)
            .await
            .unwrap();
        let source = record.source.as_ref().unwrap();
        assert_eq!(source.extraction_method, ExtractionMethod::Document);
        assert_eq!(source.url, "file:///calendar.pdf");
        assert_eq!(source.retrieved_at, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(record.series.events[0].venue.timezone.as_deref(), Some("Asia/Qatar"));
    }

    #[tokio::test]
    async fn invalid_extraction_output_is_a_validation_failure() {
        let err = pipeline(r#"{"series": {"name": "Nothing", "season": 2025, "events": []}}"#)
            .ingest_document("irrelevant", ContentKind::Text, ExtractionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_failure");
        assert!(err.operator_message().contains("series.events"));
    }

    #[tokio::test]
    async fn prose_without_json_is_unparsable() {
        let err = pipeline("Sorry, I could not find a schedule.")
            .ingest_document("irrelevant", ContentKind::Text, ExtractionContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unparsable_response");
        match err {
            PipelineError::Extraction(inner) => {
                assert_eq!(inner.raw_response(), Some("Sorry, I could not find a schedule."))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_site_surfaces_fetch_failure() {
        let request = FetchRequest::new("https://example.org/calendar").unwrap();
        let err = pipeline("{}")
            .acquire(&request, ExtractionContext::default(), &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "all_strategies_failed");
        match err {
            PipelineError::Fetch(FetchError::AllStrategiesFailed { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Network { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
