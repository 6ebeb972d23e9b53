use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Configuration problems and cancellations do not go away on retry.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            BrowserError::Configuration(_) | BrowserError::Cancelled(_)
        )
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}
