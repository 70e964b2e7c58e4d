use crate::core::shared::utils::truncate_chars;

pub const MAX_TRANSCRIPT_CHARS: usize = 12_000;

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a support triage assistant for an online marketplace.
You receive a raw chat transcript between a buyer and a seller or support agent.
Extract a support ticket and draft a reply to the customer.

Respond with a single JSON object and nothing else:
{
  "title": "short summary, at most 120 characters",
  "description": "what happened and what the customer wants, in plain prose",
  "priority": "LOW | MEDIUM | HIGH | URGENT",
  "tags": ["up to five short lowercase topic tags"],
  "customer_name": "name of the customer if stated, otherwise null",
  "suggested_reply": "a polite, concrete first reply to the customer"
}

Priority guide: URGENT for safety, fraud or account lockout; HIGH for lost money or
undelivered orders; MEDIUM for defects and delays; LOW for questions and feedback.
Never invent order numbers, names or facts that are not in the transcript."#;

/// User turn for the extraction call. Long transcripts keep their beginning.
pub fn build_extraction_prompt(transcript: &str) -> String {
    let transcript = transcript.trim();
    let clipped = truncate_chars(transcript, MAX_TRANSCRIPT_CHARS);
    let note = if clipped.len() < transcript.len() {
        "\n[transcript truncated]"
    } else {
        ""
    };
    format!("Transcript:\n\"\"\"\n{clipped}{note}\n\"\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_is_capped() {
        let long = "a".repeat(MAX_TRANSCRIPT_CHARS + 500);
        let prompt = build_extraction_prompt(&long);
        assert!(prompt.contains("[transcript truncated]"));
        assert!(prompt.len() < MAX_TRANSCRIPT_CHARS + 100);

        let short = build_extraction_prompt("Buyer: hi");
        assert!(short.contains("Buyer: hi"));
        assert!(!short.contains("truncated"));
    }
}
