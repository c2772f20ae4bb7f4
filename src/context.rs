//! Request context assembly.
//!
//! This module provides:
//! - Role-tagged message units in the shape the generation API expects
//! - A bounded replay of recent history ahead of each new prompt
//! - Optional prompt augmentation with page text and a search-assist hint

use crate::history::ConversationHistory;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTEXT_PAIRS: usize = 3;
pub const DEFAULT_MAX_PAGE_CHARS: usize = 5000;

pub const SEARCH_ASSIST_INSTRUCTION: &str = "When generating your response, please consult Google Search for the latest relevant information and incorporate those findings. ";
pub const PAGE_CONTEXT_PREFACE: &str = "Context from the current webpage:";
pub const TRUNCATION_MARKER: &str = "...\n[Content Truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One role-tagged unit of the request. Serializes as `{role, parts: [{text}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUnit {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl MessageUnit {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn text(&self) -> &str {
        self.parts.first().map(|p| p.text.as_str()).unwrap_or("")
    }
}

/// Build the request for `new_prompt`, replaying at most `max_pairs` prior
/// turns. The result never exceeds `2 * max_pairs + 1` units and always ends
/// with a user unit carrying `new_prompt`.
pub fn build_request_messages(
    history: &ConversationHistory,
    new_prompt: &str,
    max_pairs: usize,
) -> Vec<MessageUnit> {
    let turns = history.recent_turns(max_pairs);
    let mut messages = Vec::with_capacity(2 * turns.len() + 1);

    for (prompt, response) in turns {
        if !prompt.is_empty() {
            messages.push(MessageUnit::user(prompt));
        }
        if !response.is_empty() {
            messages.push(MessageUnit::model(response));
        }
    }

    messages.push(MessageUnit::user(new_prompt));
    messages
}

/// Extra context layered onto the outgoing prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Augmentation {
    /// Ask the model to consult web search.
    pub search_assist: bool,
    /// Extracted text of the active page, if it could be read.
    pub page_text: Option<String>,
    pub max_page_chars: usize,
}

impl Augmentation {
    pub fn is_empty(&self) -> bool {
        !self.search_assist && self.page_text.is_none()
    }
}

/// Apply `augmentation` to `prompt`. Without any augmentation the prompt is
/// returned unchanged; history always stores the unaugmented text.
pub fn augment_prompt(prompt: &str, augmentation: &Augmentation) -> String {
    if augmentation.is_empty() {
        return prompt.to_string();
    }

    let mut prefix = String::new();
    if augmentation.search_assist {
        prefix.push_str(SEARCH_ASSIST_INSTRUCTION);
    }
    if let Some(text) = &augmentation.page_text {
        let page = truncate_chars(text, augmentation.max_page_chars);
        prefix.push_str(&format!("{}\n\"\"\"\n{}\n\"\"\"\n\n", PAGE_CONTEXT_PREFACE, page));
    }

    format!("{}User prompt: {}", prefix, prompt)
}

/// Cut `text` to `max_chars` characters, appending the truncation marker
/// when anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{}", &text[..byte_index], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
