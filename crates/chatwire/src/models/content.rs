use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::value::ToolValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageMediaType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/webp")]
    Webp,
}

impl ImageMediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMediaType::Png => "image/png",
            ImageMediaType::Jpeg => "image/jpeg",
            ImageMediaType::Gif => "image/gif",
            ImageMediaType::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    /// Set when the model declined to answer; some vendors report this apart from the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl TextContent {
    /// The text, or the refusal when the text is empty.
    pub fn text_or_refusal(&self) -> &str {
        match &self.refusal {
            Some(refusal) if self.text.is_empty() => refusal,
            _ => &self.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub media_type: ImageMediaType,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImageContent {
    pub fn base64_data(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "tool_call_id")]
    pub id: String,
    #[serde(rename = "tool_name")]
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(rename = "tool_call_id")]
    pub id: String,
    #[serde(rename = "tool_name")]
    pub name: String,
    #[serde(default)]
    pub result: ToolValue,
}

/// One block of message content. Which variants are valid depends on the message role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextContent),
    Image(ImageContent),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text(TextContent {
            text: text.into(),
            refusal: None,
        })
    }

    pub fn refusal<S: Into<String>>(refusal: S) -> Self {
        ContentBlock::Text(TextContent {
            text: String::new(),
            refusal: Some(refusal.into()),
        })
    }

    pub fn image(media_type: ImageMediaType, data: Vec<u8>) -> Self {
        ContentBlock::Image(ImageContent { media_type, data })
    }

    pub fn tool_call<S: Into<String>, T: Into<String>>(
        id: S,
        name: T,
        arguments: Map<String, Value>,
    ) -> Self {
        ContentBlock::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }

    pub fn tool_result<S: Into<String>, T: Into<String>>(
        id: S,
        name: T,
        result: ToolValue,
    ) -> Self {
        ContentBlock::ToolResult(ToolResult {
            id: id.into(),
            name: name.into(),
            result,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        }
    }

    /// The block's type tag, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::Image(_) => "image",
            ContentBlock::ToolCall(_) => "tool_call",
            ContentBlock::ToolResult(_) => "tool_result",
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
