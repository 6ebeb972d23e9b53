use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredJson {
    pub value: Value,
    /// Trailing commas had to be removed before the value parsed.
    pub repaired: bool,
}

/// Finds the first JSON object or array in free-form model output, looking
/// inside code fences first. A candidate that only parses once trailing
/// commas are dropped still wins over any value nested inside it.
pub fn first_json_value(text: &str) -> Option<RecoveredJson> {
    FENCE
        .captures_iter(text)
        .filter_map(|fenced| fenced.get(1))
        .find_map(|body| first_value_in(body.as_str()))
        .or_else(|| first_value_in(text))
        .map(|(value, repaired)| RecoveredJson { value, repaired })
}

/// Drops commas that directly precede `}` or `]`, leaving string literals
/// untouched. `None` when there was nothing to drop.
fn strip_trailing_commas(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut dropped = false;
    for (index, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let closes = chars[index + 1..]
                .iter()
                .find(|next| !next.is_whitespace())
                .is_some_and(|next| *next == '}' || *next == ']');
            if closes {
                dropped = true;
                continue;
            }
        }
        out.push(c);
    }
    dropped.then_some(out)
}

fn first_value_in(text: &str) -> Option<(Value, bool)> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(start, _)| {
            let candidate = &text[start..];
            if let Some(value) = leading_value(candidate) {
                return Some((value, false));
            }
            strip_trailing_commas(candidate)
                .and_then(|fixed| leading_value(&fixed))
                .map(|value| (value, true))
        })
}

fn leading_value(text: &str) -> Option<Value> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) if value.is_object() || value.is_array() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_prose_and_fences() {
        let raw = "Here is the data:\n```json\n{\"series\":\"X\"}\n```";
        let recovered = first_json_value(raw).unwrap();
        assert_eq!(recovered.value, json!({"series": "X"}));
        assert!(!recovered.repaired);
    }

    #[test]
    fn finds_bare_object_after_prose() {
        let raw = "Sure [note: partial]. {\"events\": [{\"name\": \"Round 1\"}]} Hope it helps!";
        let recovered = first_json_value(raw).unwrap();
        assert_eq!(recovered.value, json!({"events": [{"name": "Round 1"}]}));
    }

    #[test]
    fn unlabelled_fence_is_accepted() {
        let raw = "```\n[1, 2, 3]\n```";
        assert_eq!(first_json_value(raw).unwrap().value, json!([1, 2, 3]));
    }

    #[test]
    fn repairs_trailing_commas() {
        let raw = "```json\n{\"events\": [{\"name\": \"Monza\",},],}\n```";
        let recovered = first_json_value(raw).unwrap();
        assert_eq!(recovered.value, json!({"events": [{"name": "Monza"}]}));
        assert!(recovered.repaired);
    }

    #[test]
    fn repair_leaves_string_values_alone() {
        let raw = r#"{"note": "laps 1,] and 2,}", "events": [{"name": "Imola"},]}"#;
        let recovered = first_json_value(raw).unwrap();
        assert_eq!(
            recovered.value,
            json!({"note": "laps 1,] and 2,}", "events": [{"name": "Imola"}]})
        );
        assert!(recovered.repaired);

        let escaped = r#"{"quote": "say \"hi,]\"", "n": 1,}"#;
        let recovered = first_json_value(escaped).unwrap();
        assert_eq!(recovered.value, json!({"quote": "say \"hi,]\"", "n": 1}));
    }

    #[test]
    fn repaired_outer_value_beats_nested_one() {
        let raw = "Result: {\"series\": {\"name\": \"WEC\"}, \"events\": [{\"name\": \"Spa\"},],}";
        let recovered = first_json_value(raw).unwrap();
        assert_eq!(
            recovered.value,
            json!({"series": {"name": "WEC"}, "events": [{"name": "Spa"}]})
        );
        assert!(recovered.repaired);
    }

    #[test]
    fn prose_without_json_is_none() {
        assert!(first_json_value("I could not find a schedule on this page.").is_none());
        assert!(first_json_value("{ not json at all").is_none());
    }
}
