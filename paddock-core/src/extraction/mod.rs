mod backend;
mod error;
mod json;
mod prompt;
mod service;

pub use backend::{
    backend_from_config, backend_with_credential, AnthropicBackend, ExtractionBackend,
    GeminiBackend, Secret,
};
pub use error::{ExtractionError, ExtractionErrorKind, ExtractionResult};
pub use json::{first_json_value, RecoveredJson};
pub use prompt::{build_prompt, clean_html, default_schema_description, ExtractionPrompt};
pub use service::{ExtractionCandidate, ExtractionContext, ExtractionRequest, ExtractionService};
