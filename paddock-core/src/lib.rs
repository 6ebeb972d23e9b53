pub mod browser;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod extraction;
pub mod fetch;
pub mod pipeline;
pub mod schedule;
pub mod sqlite;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    load_pipeline_config, BrowserSection, CacheSection, ExtractionProvider, ExtractionSection,
    FetchSection, PipelineConfig, RateLimitSection, RetrySection,
};
pub use error::{ConfigError, Result};
pub use fetch::{
    ContentKind, FetchError, FetchErrorKind, FetchRequest, FetchResult, PageFetcher, Provenance,
};
pub use pipeline::{fetcher_from_config, PipelineError, PipelineResult, SchedulePipeline};
pub use schedule::{SchemaValidator, ValidatedRecord, ValidationFailure, ValidationWarning};
