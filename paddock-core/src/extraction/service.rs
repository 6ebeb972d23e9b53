use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ExtractionSection;
use crate::fetch::ContentKind;

use super::backend::{backend_from_config, ExtractionBackend};
use super::error::{ExtractionError, ExtractionResult};
use super::json::first_json_value;
use super::prompt::{build_prompt, default_schema_description};

/// Caller-supplied facts that help the backend read the content.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionContext {
    pub series_name: Option<String>,
    pub season: Option<i32>,
    pub source_url: Option<String>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub content: String,
    pub kind: ContentKind,
    pub schema_description: Value,
    pub context: ExtractionContext,
}

impl ExtractionRequest {
    pub fn new(content: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            content: content.into(),
            kind,
            schema_description: default_schema_description(),
            context: ExtractionContext::default(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema_description = schema;
        self
    }

    pub fn with_context(mut self, context: ExtractionContext) -> Self {
        self.context = context;
        self
    }
}

/// Unvalidated backend output. Never trusted until validated.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionCandidate {
    pub payload: Value,
    pub raw_response: String,
    pub provider: String,
    pub model: String,
    pub warnings: Vec<String>,
}

/// One backend call per `extract`; retries belong to the caller.
pub struct ExtractionService {
    backend: Arc<dyn ExtractionBackend>,
    settings: ExtractionSection,
}

impl std::fmt::Debug for ExtractionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionService")
            .field("provider", &self.backend.provider())
            .field("model", &self.backend.model())
            .finish()
    }
}

impl ExtractionService {
    pub fn new(backend: Arc<dyn ExtractionBackend>, settings: ExtractionSection) -> Self {
        Self { backend, settings }
    }

    pub fn from_config(settings: &ExtractionSection) -> ExtractionResult<Self> {
        Ok(Self::new(backend_from_config(settings)?, settings.clone()))
    }

    pub fn provider(&self) -> &str {
        self.backend.provider()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult<ExtractionCandidate> {
        let (prompt, mut warnings) = build_prompt(request, &self.settings);
        let raw = timeout(self.settings.timeout(), self.backend.complete(&prompt))
            .await
            .map_err(|_| {
                ExtractionError::BackendUnavailable(format!(
                    "no answer within {}s",
                    self.settings.timeout().as_secs()
                ))
            })??;

        let Some(recovered) = first_json_value(&raw) else {
            warn!(
                provider = self.backend.provider(),
                chars = raw.len(),
                "Extraction response held no JSON"
            );
            return Err(ExtractionError::UnparsableResponse { raw });
        };
        if recovered.repaired {
            warnings.push("extraction output needed trailing-comma repair".to_string());
        }
        info!(
            provider = self.backend.provider(),
            model = self.backend.model(),
            kind = %request.kind,
            chars = raw.len(),
            "Extraction complete"
        );
        Ok(ExtractionCandidate {
            payload: recovered.value,
            raw_response: raw,
            provider: self.backend.provider().to_string(),
            model: self.backend.model().to_string(),
            warnings,
        })
    }
}
