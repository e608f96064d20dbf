//! Prompt text and chat message assembly

use citeforge_common::history::Turn;
use serde::{Deserialize, Serialize};

/// Rules the generator answers under
pub const SYSTEM_PROMPT: &str = "You are a travel planning assistant for first-time visitors.\n\
Use ONLY the provided CONTEXT.\n\
If something is not in the context, say you don't know and ask a follow-up question.\n\
Cite supporting chunks using bracket citations like [1], [2] that refer to the numbered CONTEXT blocks.\n\
Be practical: itinerary bullets, neighborhoods, transit tips, and food suggestions.\n";

/// Canned reply when retrieval found nothing to ground an answer on
pub const INSUFFICIENT_EVIDENCE_ANSWER: &str = "I don't know: the indexed documents do not contain \
enough evidence to answer that. Could you rephrase the question or ask about something the guides cover?";

/// One chat message in OpenAI wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }
    }
}

/// The user message carrying the question and its evidence
pub fn render_question(question: &str, context: &str) -> String {
    format!(
        "QUESTION:\n{}\n\nCONTEXT:\n{}\n\nWrite an answer grounded in the context. Include citations like [1], [2].",
        question, context
    )
}

/// System prompt, then prior turns, then the grounded question.
///
/// `history` is expected to be already windowed; blank turns are skipped.
pub fn build_messages(question: &str, context: &str, history: &[&Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(
        history
            .iter()
            .filter(|turn| !turn.content.trim().is_empty())
            .map(|turn| ChatMessage::from(*turn)),
    );
    messages.push(ChatMessage::user(render_question(question, context)));
    messages
}
