//! Inbound message envelopes and best-effort text extraction.

use serde::{Deserialize, Serialize};

/// Longest structural summary stored when no text is extractable.
const SUMMARY_MAX_CHARS: usize = 800;

/// An inbound message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Transport-assigned message id, unique per tenant when present.
    pub id: Option<String>,
    /// Normalized address of the remote party.
    pub remote: String,
    /// True when the message was authored by the tenant's own session
    /// (an echo); echoes are not logged.
    pub from_me: bool,
    pub content: MessageContent,
}

/// Message payload variants the extractor understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    ExtendedText { text: String },
    /// Media message; only the caption is text-extractable.
    Caption { caption: String, media_kind: String },
    /// Anything else the transport delivers.
    Other { payload: serde_json::Value },
}

impl MessageEnvelope {
    /// Best-effort text body: plain text, extended text, or caption.
    /// Falls back to a truncated structural summary of the payload so
    /// the log always has something searchable.
    pub fn extract_text(&self) -> String {
        let candidate = match &self.content {
            MessageContent::Text { text } | MessageContent::ExtendedText { text } => Some(text),
            MessageContent::Caption { caption, .. } => Some(caption),
            MessageContent::Other { .. } => None,
        };
        match candidate {
            Some(text) if !text.is_empty() => text.clone(),
            _ => truncate(&self.summary(), SUMMARY_MAX_CHARS),
        }
    }

    fn summary(&self) -> String {
        serde_json::to_string(&self.content).unwrap_or_else(|_| "<unrepresentable>".into())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(content: MessageContent) -> MessageEnvelope {
        MessageEnvelope {
            id: None,
            remote: "15550100@wire.courier".into(),
            from_me: false,
            content,
        }
    }

    #[test]
    fn plain_text_wins() {
        let env = envelope(MessageContent::Text {
            text: "hello".into(),
        });
        assert_eq!(env.extract_text(), "hello");
    }

    #[test]
    fn caption_is_extracted() {
        let env = envelope(MessageContent::Caption {
            caption: "look at this".into(),
            media_kind: "image".into(),
        });
        assert_eq!(env.extract_text(), "look at this");
    }

    #[test]
    fn empty_caption_falls_back_to_summary() {
        let env = envelope(MessageContent::Caption {
            caption: String::new(),
            media_kind: "image".into(),
        });
        let text = env.extract_text();
        assert!(text.contains("image"));
    }

    #[test]
    fn unknown_payload_summary_is_truncated() {
        let blob = "x".repeat(5000);
        let env = envelope(MessageContent::Other {
            payload: serde_json::json!({ "sticker": blob }),
        });
        let text = env.extract_text();
        assert!(text.chars().count() <= 800);
        assert!(text.starts_with('{'));
    }
}
