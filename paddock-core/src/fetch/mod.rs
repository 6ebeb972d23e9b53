pub mod cache;
pub mod error;
mod fetcher;
pub mod metrics;
mod network;
mod rate_limiter;
mod retry;
mod types;

pub use cache::{
    normalize_url, CacheEntry, CacheError, CacheKey, CacheResult, CacheStore, CachedPayload,
    MemoryCacheStore, ResponseCache, SqliteCacheStore,
};
pub use error::{FetchError, FetchErrorKind, FetchOutcome};
pub use fetcher::{GraduatedEndpoint, PageFetcher};
pub use metrics::{FetchMetrics, MetricsHandle};
pub use network::{NetworkClient, NetworkResponse, ReqwestNetworkClient};
pub use rate_limiter::{Admission, RateLimiter};
pub use retry::{RetryOutcome, RetryPolicy};
pub use types::{
    destination_of, truncate_prefix, ContentKind, FetchRequest, FetchResult, FetchTiming,
    InvalidRequest, Provenance,
};
