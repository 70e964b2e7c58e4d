//! Turns model output into a ticket draft.
//!
//! Parsing never fails. Whatever the model returns, the draft has a usable
//! title, a priority from the known set and at most [`MAX_TAGS`] clean tags.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::shared::enums::TicketPriority;
use crate::core::shared::utils::truncate_chars;

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_DESCRIPTION_CHARS: usize = 4000;
pub const MAX_TAGS: usize = 5;
pub const MAX_TAG_CHARS: usize = 32;
const FALLBACK_TITLE: &str = "Marketplace conversation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketDraft {
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub tags: Vec<String>,
    pub customer_name: Option<String>,
    pub suggested_reply: Option<String>,
}

/// Extract JSON from response (handles code blocks and plain JSON)
pub fn extract_json(response: &str) -> String {
    let response = response.trim();

    if let Some(start) = response.find("```") {
        if let Some(json_start) = response[start..].find('{') {
            let json_part = &response[start + json_start..];
            if let Some(end) = json_part.find("```") {
                return json_part[..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}

/// Trimmed, lower-cased, inner whitespace as `-`, at most 32 chars, deduplicated,
/// at most five. Non-string entries are skipped.
pub fn clean_tags(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    let mut tags: Vec<String> = Vec::new();
    for item in items {
        let Some(raw) = item.as_str() else { continue };
        let tag = raw
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        let tag = truncate_chars(&tag, MAX_TAG_CHARS);
        if tag.is_empty() || tags.contains(&tag) {
            continue;
        }
        tags.push(tag);
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn fallback_title(transcript: &str) -> String {
    transcript
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| truncate_chars(l, MAX_TITLE_CHARS))
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

pub fn parse_extraction(response: &str, transcript: &str) -> TicketDraft {
    let value = serde_json::from_str::<Value>(&extract_json(response))
        .ok()
        .filter(Value::is_object)
        .unwrap_or(Value::Null);

    let title = text_field(&value, "title")
        .map(|t| truncate_chars(&t, MAX_TITLE_CHARS))
        .unwrap_or_else(|| fallback_title(transcript));

    let description = text_field(&value, "description")
        .unwrap_or_else(|| transcript.trim().to_string());

    let priority = value
        .get("priority")
        .and_then(Value::as_str)
        .map(TicketPriority::clamp_from)
        .unwrap_or_default();

    TicketDraft {
        title,
        description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
        priority,
        tags: value.get("tags").map(clean_tags).unwrap_or_default(),
        customer_name: text_field(&value, "customer_name"),
        suggested_reply: text_field(&value, "suggested_reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TRANSCRIPT: &str = "\n  Buyer: my order #4411 never arrived\nSeller: sorry!";

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("Sure! {\"a\":{\"b\":2}} hope it helps"), "{\"a\":{\"b\":2}}");
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[test]
    fn test_well_formed_output() {
        let raw = json!({
            "title": "Order #4411 not delivered",
            "description": "Buyer reports a missing parcel.",
            "priority": "high",
            "tags": ["Shipping", "lost package", "shipping"],
            "customer_name": "Dana",
            "suggested_reply": "We're on it."
        })
        .to_string();
        let draft = parse_extraction(&raw, TRANSCRIPT);
        assert_eq!(draft.title, "Order #4411 not delivered");
        assert_eq!(draft.priority, TicketPriority::High);
        assert_eq!(draft.tags, vec!["shipping".to_string(), "lost-package".to_string()]);
        assert_eq!(draft.customer_name.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_garbage_output_falls_back() {
        let draft = parse_extraction("I cannot help with that.", TRANSCRIPT);
        assert_eq!(draft.title, "Buyer: my order #4411 never arrived");
        assert_eq!(draft.priority, TicketPriority::Medium);
        assert!(draft.tags.is_empty());
        assert!(draft.description.starts_with("Buyer:"));
    }

    #[test]
    fn test_hostile_output_is_clamped() {
        let raw = json!({
            "title": "x".repeat(500),
            "priority": "SEV-0 EMERGENCY",
            "tags": [1, null, "A", "b", "c", "d", "e", "f", "g", "  ", "t".repeat(80)]
        })
        .to_string();
        let draft = parse_extraction(&raw, TRANSCRIPT);
        assert_eq!(draft.title.chars().count(), MAX_TITLE_CHARS);
        assert!(TicketPriority::ALL.contains(&draft.priority));
        assert_eq!(draft.tags.len(), MAX_TAGS);
        assert!(draft.tags.iter().all(|t| t.chars().count() <= MAX_TAG_CHARS));

        let numeric_priority = parse_extraction(r#"{"priority": 3, "tags": "billing"}"#, TRANSCRIPT);
        assert_eq!(numeric_priority.priority, TicketPriority::Medium);
        assert!(numeric_priority.tags.is_empty());
    }

    #[test]
    fn test_empty_transcript_title() {
        let draft = parse_extraction("{}", "   ");
        assert_eq!(draft.title, "Marketplace conversation");
    }
}
