//! Structured-output extraction from backend text.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::error::BackendError;
use crate::util::truncate_chars;

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()
}

/// Pull the JSON body out of model output.
///
/// Tries, in order: a fenced code block, the outermost `{...}` span, the
/// whole trimmed text.
pub fn extract_json(content: &str) -> &str {
    if let Some(caps) = fence_pattern().and_then(|re| re.captures(content)) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim();
        }
    }
    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content.trim(),
    }
}

/// Parse model output into `T`, reporting a parse failure on mismatch.
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, BackendError> {
    let body = extract_json(content);
    serde_json::from_str(body).map_err(|e| {
        BackendError::parse_error(format!(
            "{} in output: {}",
            e,
            truncate_chars(content, 200)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HypothesisDraft;

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"statement\": \"faces\", \"confidence\": 0.8}\n```\nDone.";
        let draft: HypothesisDraft = parse_structured(text).unwrap();
        assert_eq!(draft.statement, "faces");
        assert_eq!(draft.confidence, 0.8);
    }

    #[test]
    fn test_bare_object_with_prose() {
        let text = "I think {\"statement\": \"short title\", \"confidence\": 0.4} fits best.";
        let draft: HypothesisDraft = parse_structured(text).unwrap();
        assert_eq!(draft.statement, "short title");
    }

    #[test]
    fn test_parse_failure_is_distinct() {
        let err = parse_structured::<HypothesisDraft>("no structure here").unwrap_err();
        assert!(err.is_parse_failure());
        assert!(!err.is_transient());
    }
}
