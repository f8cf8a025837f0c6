use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::content::ToolCall;
use super::message::Message;

/// Why generation stopped, normalized across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    #[default]
    Unknown,
}

impl FinishReason {
    /// Maps a vendor's literal stop reason into the fixed taxonomy.
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub id: String,
    pub messages: Vec<Message>,
    pub finish_reason: FinishReason,
    /// The vendor's own finish string, before normalization
    pub vendor_finish_reason: String,
    pub usage: TokenUsage,
    pub content_filter_result: Option<String>,
}

impl ModelResponse {
    pub fn new<S: Into<String>, R: Into<String>>(
        id: S,
        messages: Vec<Message>,
        vendor_finish_reason: R,
        usage: TokenUsage,
    ) -> Self {
        let vendor_finish_reason = vendor_finish_reason.into();
        Self {
            id: id.into(),
            messages,
            finish_reason: FinishReason::from_vendor(&vendor_finish_reason),
            vendor_finish_reason,
            usage,
            content_filter_result: None,
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.messages.iter().flat_map(Message::tool_calls)
    }

    /// Text of all returned messages
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(Message::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
