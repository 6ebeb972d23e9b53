use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::config::ExtractionSection;
use crate::fetch::{truncate_prefix, ContentKind};

use super::ExtractionRequest;

const SYSTEM_PROMPT: &str = "You extract motorsport event schedules from web pages and documents. \
Answer with a single JSON object that conforms to the schema you are given and nothing else. \
Use null for values the content does not state. Never invent events or sessions. \
Session times must be ISO 8601 with a UTC offset when the content gives a time zone.";

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPrompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<svg\b.*?</svg\s*>|<!--.*?-->",
    )
    .expect("valid regex")
});

static SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Drops scripts, styles, inline SVG and comments, then collapses runs of
/// whitespace.
pub fn clean_html(html: &str) -> String {
    let stripped = NOISE.replace_all(html, " ");
    SPACE
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

/// Series → events → sessions shape the validator understands.
pub fn default_schema_description() -> Value {
    json!({
        "type": "object",
        "required": ["series"],
        "properties": {
            "series": {
                "type": "object",
                "required": ["name", "season", "events"],
                "properties": {
                    "series_id": {"type": "string"},
                    "name": {"type": "string"},
                    "season": {"type": "integer"},
                    "category": {
                        "type": "string",
                        "enum": ["OPENWHEEL", "ENDURANCE", "RALLY", "MOTORCYCLE", "GT",
                                 "TOURING", "FORMULA", "SPORTCAR", "STOCK", "OTHER"]
                    },
                    "events": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name", "start_date"],
                            "properties": {
                                "event_id": {"type": "string"},
                                "name": {"type": "string"},
                                "start_date": {"type": "string", "format": "date"},
                                "end_date": {"type": "string", "format": "date"},
                                "venue": {
                                    "type": "object",
                                    "properties": {
                                        "circuit": {"type": "string"},
                                        "city": {"type": "string"},
                                        "region": {"type": "string"},
                                        "country": {"type": "string"},
                                        "timezone": {"type": "string", "description": "IANA zone"}
                                    }
                                },
                                "sessions": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "required": ["name", "type"],
                                        "properties": {
                                            "session_id": {"type": "string"},
                                            "name": {"type": "string"},
                                            "type": {
                                                "type": "string",
                                                "enum": ["PRACTICE", "QUALIFYING", "RACE", "SPRINT",
                                                         "WARMUP", "TEST", "STAGE", "RALLY_STAGE",
                                                         "RACE_1", "RACE_2", "FEATURE", "HEAT", "OTHER"]
                                            },
                                            "start": {"type": "string", "format": "date-time"},
                                            "end": {"type": "string", "format": "date-time"},
                                            "status": {
                                                "type": "string",
                                                "enum": ["SCHEDULED", "UPDATED", "CANCELLED", "TBD"]
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Builds the backend prompt. Returns warnings for any input reduction.
pub fn build_prompt(
    request: &ExtractionRequest,
    settings: &ExtractionSection,
) -> (ExtractionPrompt, Vec<String>) {
    let mut warnings = Vec::new();
    let mut content = match request.kind {
        ContentKind::Html => clean_html(&request.content),
        ContentKind::Json | ContentKind::Text => request.content.clone(),
    };
    if let Some(dropped) = truncate_prefix(&mut content, settings.max_content_chars) {
        warnings.push(format!(
            "extraction input truncated to the first {} characters ({dropped} dropped)",
            settings.max_content_chars
        ));
    }

    let mut user = String::new();
    let context = &request.context;
    if let Some(series) = &context.series_name {
        user.push_str(&format!("Series: {series}\n"));
    }
    if let Some(season) = context.season {
        user.push_str(&format!("Season: {season}\n"));
    }
    if let Some(url) = &context.source_url {
        user.push_str(&format!("Source: {url}\n"));
    }
    if !context.hints.is_empty() {
        user.push_str("Notes about this source:\n");
        for hint in &context.hints {
            user.push_str(&format!("- {hint}\n"));
        }
    }
    let schema = serde_json::to_string_pretty(&request.schema_description)
        .unwrap_or_else(|_| request.schema_description.to_string());
    user.push_str(&format!(
        "\nReturn JSON matching this schema:\n{schema}\n\nContent ({}):\n{content}\n",
        request.kind
    ));

    (
        ExtractionPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
        },
        warnings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionContext, ExtractionRequest};

    #[test]
    fn clean_html_removes_noise() {
        let html = "<html><head><style>.a{}</style><script>var x = '<b>';</script></head>\n\
                    <body>  <!-- nav -->  <h1>Round   1</h1>\n\n<noscript>enable js</noscript></body></html>";
        assert_eq!(
            clean_html(html),
            "<html><head> </head> <body> <h1>Round 1</h1> </body></html>"
        );
    }

    #[test]
    fn prompt_carries_context_and_schema() {
        let request = ExtractionRequest::new("Round 1 - Sakhir - 2 March", ContentKind::Text)
            .with_context(ExtractionContext {
                series_name: Some("Formula 1".into()),
                season: Some(2025),
                source_url: Some("https://example.com/calendar".into()),
                hints: vec!["Times are local".into()],
            });
        let (prompt, warnings) = build_prompt(&request, &ExtractionSection::default());
        assert!(warnings.is_empty());
        assert!(prompt.user.contains("Series: Formula 1"));
        assert!(prompt.user.contains("Season: 2025"));
        assert!(prompt.user.contains("- Times are local"));
        assert!(prompt.user.contains("\"RALLY_STAGE\""));
        assert!(prompt.user.ends_with("Content (text):\nRound 1 - Sakhir - 2 March\n"));
        assert_eq!(prompt.temperature, 0.1);
        assert_eq!(prompt.max_output_tokens, 8192);
    }

    #[test]
    fn oversized_input_is_truncated_with_warning() {
        let request = ExtractionRequest::new("x".repeat(120), ContentKind::Text);
        let settings = ExtractionSection {
            max_content_chars: 100,
            ..ExtractionSection::default()
        };
        let (prompt, warnings) = build_prompt(&request, &settings);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("20 dropped"));
        assert!(prompt.user.ends_with(&format!("{}\n", "x".repeat(100))));
    }
}
