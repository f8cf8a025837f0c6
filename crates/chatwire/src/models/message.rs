use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::content::{ContentBlock, ImageMediaType, ToolCall, ToolResult};
use super::role::Role;
use super::value::ToolValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single turn in a conversation
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub contents: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            name: None,
            contents: Vec::new(),
        }
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add any ContentBlock to the message
    pub fn with_content(mut self, content: ContentBlock) -> Self {
        self.contents.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentBlock::text(text))
    }

    pub fn with_image(self, media_type: ImageMediaType, data: Vec<u8>) -> Self {
        self.with_content(ContentBlock::image(media_type, data))
    }

    pub fn with_tool_call<S: Into<String>, T: Into<String>>(
        self,
        id: S,
        name: T,
        arguments: Map<String, Value>,
    ) -> Self {
        self.with_content(ContentBlock::tool_call(id, name, arguments))
    }

    pub fn with_tool_result<S: Into<String>, T: Into<String>>(
        self,
        id: S,
        name: T,
        result: ToolValue,
    ) -> Self {
        self.with_content(ContentBlock::tool_result(id, name, result))
    }

    /// All text blocks joined by newlines
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.contents.iter().filter_map(ContentBlock::as_tool_call)
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.contents.iter().filter_map(ContentBlock::as_tool_result)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }
}
