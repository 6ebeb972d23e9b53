use serde::Serialize;
use thiserror::Error;

use crate::browser::BrowserError;

pub type FetchOutcome<T> = Result<T, FetchError>;

/// Coarse classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    RateLimitCancelled,
    AllStrategiesFailed,
    Blocked,
    Timeout,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::RateLimitCancelled => "rate_limit_cancelled",
            FetchErrorKind::AllStrategiesFailed => "all_strategies_failed",
            FetchErrorKind::Blocked => "blocked",
            FetchErrorKind::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cancelled while waiting on {waiting_on}")]
    RateLimitCancelled { waiting_on: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("{url} rejected the request with status {status}")]
    Blocked { url: String, status: u16 },
    #[error("all strategies failed for {url} after {attempts} attempt(s): {last}")]
    AllStrategiesFailed {
        url: String,
        attempts: usize,
        last: Box<FetchError>,
    },
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("content from {url} is not usable: {reason}")]
    UnusableContent { url: String, reason: String },
    #[error("browser rendering is disabled")]
    BrowserDisabled,
    #[error("browser error: {0}")]
    Browser(BrowserError),
}

impl FetchError {
    pub fn cancelled(waiting_on: impl Into<String>) -> Self {
        FetchError::RateLimitCancelled {
            waiting_on: waiting_on.into(),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::RateLimitCancelled { .. } => FetchErrorKind::RateLimitCancelled,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Blocked { .. } => FetchErrorKind::Blocked,
            _ => FetchErrorKind::AllStrategiesFailed,
        }
    }

    /// Whether another pass of the strategy sequence could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Blocked { .. } | FetchError::Network { .. } => {
                true
            }
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Browser(err) => err.is_transient(),
            FetchError::RateLimitCancelled { .. }
            | FetchError::AllStrategiesFailed { .. }
            | FetchError::UnusableContent { .. }
            | FetchError::BrowserDisabled => false,
        }
    }

    /// Failures that end the attempt before the browser is tried.
    pub(crate) fn skips_browser(&self) -> bool {
        match self {
            FetchError::RateLimitCancelled { .. } => true,
            FetchError::Status { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }

    /// Innermost cause, following `AllStrategiesFailed` chains.
    pub fn root_cause(&self) -> &FetchError {
        match self {
            FetchError::AllStrategiesFailed { last, .. } => last.root_cause(),
            other => other,
        }
    }

    pub fn operator_message(&self) -> String {
        match self {
            FetchError::RateLimitCancelled { waiting_on } => format!(
                "The fetch was cancelled while waiting on {waiting_on}. Nothing was sent; retry when ready."
            ),
            FetchError::Timeout(what) => format!(
                "The remote site did not answer in time ({what}). Try again later or raise the navigation timeout."
            ),
            FetchError::Blocked { url, status } => format!(
                "{url} refused access (HTTP {status}). The site is rejecting automated requests; try again much later or use a different source."
            ),
            FetchError::AllStrategiesFailed { url, attempts, last } => format!(
                "Could not retrieve {url} after {attempts} attempt(s). Last problem: {}",
                last.operator_message()
            ),
            FetchError::Status { url, status } => {
                format!("{url} answered with HTTP {status}; check that the address is correct.")
            }
            FetchError::UnusableContent { url, reason } => format!(
                "{url} returned content that cannot be used ({reason}). Enabling browser rendering may help."
            ),
            FetchError::BrowserDisabled => {
                "The page needs a browser to render but browser rendering is disabled.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<BrowserError> for FetchError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Cancelled(what) => FetchError::RateLimitCancelled { waiting_on: what },
            BrowserError::Timeout(what) => FetchError::Timeout(what),
            other => FetchError::Browser(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_collapse_to_four_classes() {
        assert_eq!(
            FetchError::cancelled("example.com:443").kind(),
            FetchErrorKind::RateLimitCancelled
        );
        assert_eq!(
            FetchError::Timeout("GET".into()).kind(),
            FetchErrorKind::Timeout
        );
        let network = FetchError::Network {
            url: "https://a".into(),
            message: "reset".into(),
        };
        assert_eq!(network.kind(), FetchErrorKind::AllStrategiesFailed);
        assert!(network.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let missing = FetchError::Status {
            url: "https://a".into(),
            status: 404,
        };
        assert!(!missing.is_transient());
        assert!(missing.skips_browser());
        let unavailable = FetchError::Status {
            url: "https://a".into(),
            status: 503,
        };
        assert!(unavailable.is_transient());
        assert!(!unavailable.skips_browser());
    }

    #[test]
    fn browser_timeouts_map_to_timeout_kind() {
        let err = FetchError::from(BrowserError::Timeout("navigation".into()));
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
        let err = FetchError::from(BrowserError::Cancelled("browser page slot".into()));
        assert_eq!(err.kind(), FetchErrorKind::RateLimitCancelled);
    }

    #[test]
    fn root_cause_unwraps_nested_failures() {
        let err = FetchError::AllStrategiesFailed {
            url: "https://a".into(),
            attempts: 3,
            last: Box::new(FetchError::Timeout("GET https://a".into())),
        };
        assert!(matches!(err.root_cause(), FetchError::Timeout(_)));
        assert!(err.operator_message().contains("3 attempt(s)"));
    }
}
