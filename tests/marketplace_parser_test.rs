use serde_json::json;

use supportdesk::core::shared::enums::TicketPriority;
use supportdesk::marketplace::parser::{
    parse_extraction, MAX_TAGS, MAX_TAG_CHARS, MAX_TITLE_CHARS,
};
use supportdesk::marketplace::prompts::{build_extraction_prompt, MAX_TRANSCRIPT_CHARS};

const TRANSCRIPT: &str = "\n  Buyer: the charger stopped working after a week\nSeller: sorry!";

#[test]
fn test_garbage_output_still_yields_a_draft() {
    for output in ["", "I cannot help with that", "{not json", "[1, 2, 3]", "null"] {
        let draft = parse_extraction(output, TRANSCRIPT);
        assert_eq!(draft.title, "Buyer: the charger stopped working after a week");
        assert_eq!(draft.priority, TicketPriority::Medium);
        assert!(draft.tags.is_empty());
        assert!(!draft.description.is_empty());
    }
}

#[test]
fn test_fenced_output_is_parsed() {
    let output = format!(
        "Here you go:\n```json\n{}\n```",
        json!({"title": "Charger failure", "priority": "urgent", "tags": ["Hardware"]})
    );
    let draft = parse_extraction(&output, TRANSCRIPT);
    assert_eq!(draft.title, "Charger failure");
    assert_eq!(draft.priority, TicketPriority::Urgent);
    assert_eq!(draft.tags, vec!["hardware".to_string()]);
}

#[test]
fn test_limits_hold_for_oversized_fields() {
    let tags: Vec<String> = (0..20).map(|i| format!("{}{}", "x".repeat(60), i)).collect();
    let output = json!({
        "title": "t".repeat(MAX_TITLE_CHARS * 3),
        "tags": tags,
    })
    .to_string();
    let draft = parse_extraction(&output, TRANSCRIPT);
    assert_eq!(draft.title.chars().count(), MAX_TITLE_CHARS);
    assert!(draft.tags.len() <= MAX_TAGS);
    assert!(draft.tags.iter().all(|t| t.chars().count() <= MAX_TAG_CHARS));
}

#[test]
fn test_long_transcripts_are_clipped_in_the_prompt() {
    let transcript = "a".repeat(MAX_TRANSCRIPT_CHARS + 500);
    let prompt = build_extraction_prompt(&transcript);
    assert!(prompt.contains("[transcript truncated]"));
    assert!(prompt.chars().count() < transcript.chars().count() + 200);
}
