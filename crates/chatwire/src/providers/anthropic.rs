use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::base::{Adapter, ChatModel, Vendor};
use super::configs::ModelOptions;
use super::http::HttpTransport;
use super::utils::{
    check_tool_names, leading_system_prompt, system_texts, InstructionFolder, InstructionTurn,
    ObjectSchema,
};
use crate::buffer::BufferPool;
use crate::errors::{ChatError, ChatResult};
use crate::models::content::ContentBlock;
use crate::models::message::Message;
use crate::models::request::ModelRequest;
use crate::models::response::{ModelResponse, TokenUsage};
use crate::models::role::Role;
use crate::models::tool::ToolChoice;

pub const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Serialize)]
pub struct ClaudeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ClaudeTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ClaudeToolChoice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeRole {
    User,
    Assistant,
}

#[derive(Debug, Serialize)]
pub struct ClaudeMessage {
    pub role: ClaudeRole,
    pub content: ClaudeMessageContent,
}

/// Claude accepts either a bare string or a list of blocks as message content.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ClaudeMessageContent {
    Text(String),
    Blocks(Vec<ClaudeContent>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContent {
    Text {
        text: String,
    },
    Image {
        source: ClaudeImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ClaudeImageSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: &'static str,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub input_schema: ObjectSchema,
}

#[derive(Debug, Serialize)]
pub struct ClaudeToolChoice {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_parallel_tool_use: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: Vec<ClaudeResponseContent>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeResponseContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClaudeUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl InstructionTurn for ClaudeMessage {
    fn is_user_turn(&self) -> bool {
        self.role == ClaudeRole::User
    }

    fn append_instruction(&mut self, instruction: String) {
        match &mut self.content {
            ClaudeMessageContent::Text(text) => {
                text.push(' ');
                text.push_str(&instruction);
            }
            ClaudeMessageContent::Blocks(blocks) => {
                blocks.push(ClaudeContent::Text { text: instruction })
            }
        }
    }

    fn prepend_instruction(&mut self, instruction: String) {
        match &mut self.content {
            ClaudeMessageContent::Text(text) => *text = format!("{} {}", instruction, text),
            ClaudeMessageContent::Blocks(blocks) => {
                blocks.insert(0, ClaudeContent::Text { text: instruction })
            }
        }
    }

    fn instruction_turn(instruction: String) -> Self {
        ClaudeMessage {
            role: ClaudeRole::User,
            content: ClaudeMessageContent::Text(instruction),
        }
    }
}

/// Where the Messages API is reached: Anthropic directly, or through Bedrock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaudeFlavor {
    Anthropic { model: String },
    Bedrock,
}

/// Translates between the canonical model and the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeAdapter {
    flavor: ClaudeFlavor,
}

impl ClaudeAdapter {
    pub fn new(flavor: ClaudeFlavor) -> Self {
        Self { flavor }
    }

    fn user_message(&self, message: &Message) -> ChatResult<ClaudeMessage> {
        if let [ContentBlock::Text(text)] = message.contents.as_slice() {
            return Ok(ClaudeMessage {
                role: ClaudeRole::User,
                content: ClaudeMessageContent::Text(text.text.clone()),
            });
        }

        let blocks = message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => Ok(ClaudeContent::Text {
                    text: text.text.clone(),
                }),
                ContentBlock::Image(image) => {
                    if image.data.is_empty() {
                        return Err(self.error("image content has no data"));
                    }
                    Ok(ClaudeContent::Image {
                        source: ClaudeImageSource {
                            kind: "base64",
                            media_type: image.media_type.as_str(),
                            data: image.base64_data(),
                        },
                    })
                }
                other => Err(self.error(format!("user message cannot carry {}", other.kind()))),
            })
            .collect::<ChatResult<Vec<_>>>()?;

        Ok(ClaudeMessage {
            role: ClaudeRole::User,
            content: ClaudeMessageContent::Blocks(blocks),
        })
    }

    fn assistant_message(&self, message: &Message) -> ChatResult<ClaudeMessage> {
        let mut blocks = Vec::new();
        for block in &message.contents {
            match block {
                ContentBlock::Text(text) => {
                    let text = text.text_or_refusal();
                    if !text.is_empty() {
                        blocks.push(ClaudeContent::Text {
                            text: text.to_string(),
                        });
                    }
                }
                ContentBlock::ToolCall(call) => blocks.push(ClaudeContent::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }),
                other => {
                    return Err(
                        self.error(format!("assistant message cannot carry {}", other.kind()))
                    )
                }
            }
        }
        if blocks.is_empty() {
            return Err(self.error("assistant message has empty content"));
        }
        Ok(ClaudeMessage {
            role: ClaudeRole::Assistant,
            content: ClaudeMessageContent::Blocks(blocks),
        })
    }

    fn tool_message(&self, message: &Message) -> ChatResult<ClaudeMessage> {
        let blocks = message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult(result) => Ok(ClaudeContent::ToolResult {
                    tool_use_id: result.id.clone(),
                    content: result.result.to_text(),
                }),
                other => Err(self.error(format!("tool message cannot carry {}", other.kind()))),
            })
            .collect::<ChatResult<Vec<_>>>()?;

        Ok(ClaudeMessage {
            role: ClaudeRole::User,
            content: ClaudeMessageContent::Blocks(blocks),
        })
    }

    fn tool_choice(&self, request: &ModelRequest) -> Option<ClaudeToolChoice> {
        if request.tools.is_empty() {
            return None;
        }
        let disable_parallel_tool_use = request.parallel_tool_calls.map(|parallel| !parallel);
        let (kind, name) = match &request.tool_choice {
            Some(ToolChoice::Auto) => ("auto", None),
            Some(ToolChoice::Required) => ("any", None),
            Some(ToolChoice::Named(name)) => ("tool", Some(name.clone())),
            None if disable_parallel_tool_use.is_some() => ("auto", None),
            None => return None,
        };
        Some(ClaudeToolChoice {
            kind,
            name,
            disable_parallel_tool_use,
        })
    }

    fn error<S: Into<String>>(&self, message: S) -> ChatError {
        ChatError::translation(self.vendor(), message)
    }
}

impl Adapter for ClaudeAdapter {
    type WireRequest = ClaudeRequest;
    type WireResponse = ClaudeResponse;

    fn vendor(&self) -> Vendor {
        match self.flavor {
            ClaudeFlavor::Anthropic { .. } => Vendor::Anthropic,
            ClaudeFlavor::Bedrock => Vendor::Bedrock,
        }
    }

    fn load(&self, request: &ModelRequest) -> ChatResult<ClaudeRequest> {
        let vendor = self.vendor();
        check_tool_names(&request.tools, vendor)?;

        let mut messages: Vec<ClaudeMessage> = Vec::new();
        let mut folder = InstructionFolder::new();
        for message in &request.messages[request.conversation_start()..] {
            if message.contents.is_empty() {
                return Err(self.error(format!("{} message has empty content", message.role)));
            }
            match message.role {
                Role::System => {
                    let text = system_texts(message, vendor)?.join("\n");
                    folder.fold(&mut messages, text);
                }
                Role::User => {
                    let mut user = self.user_message(message)?;
                    folder.attach(&mut user);
                    messages.push(user);
                }
                Role::Assistant => messages.push(self.assistant_message(message)?),
                Role::Tool => messages.push(self.tool_message(message)?),
            }
        }
        folder.finish(&mut messages);

        let tools = request
            .tools
            .iter()
            .map(|tool| ClaudeTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: ObjectSchema::from(&tool.parameters),
            })
            .collect();

        let (anthropic_version, model) = match &self.flavor {
            ClaudeFlavor::Anthropic { model } => (None, Some(model.clone())),
            ClaudeFlavor::Bedrock => (Some(BEDROCK_ANTHROPIC_VERSION.to_string()), None),
        };

        Ok(ClaudeRequest {
            anthropic_version,
            model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: leading_system_prompt(request, vendor)?,
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            tools,
            tool_choice: self.tool_choice(request),
        })
    }

    fn dump(&self, _request: &ModelRequest, response: ClaudeResponse) -> ChatResult<ModelResponse> {
        let mut message = Message::assistant();
        for content in response.content {
            match content {
                ClaudeResponseContent::Text { text } => message = message.with_text(text),
                ClaudeResponseContent::ToolUse { id, name, input } => {
                    let arguments = match input {
                        Value::Object(map) => map,
                        Value::Null => Map::new(),
                        other => {
                            return Err(ChatError::protocol(
                                self.vendor(),
                                format!("tool_use input for {} is not an object: {}", name, other),
                            ))
                        }
                    };
                    message = message.with_tool_call(id, name, arguments);
                }
                ClaudeResponseContent::Unsupported => {
                    warn!(vendor = %self.vendor(), "skipping unsupported content block")
                }
            }
        }

        Ok(ModelResponse::new(
            response.id,
            vec![message],
            response.stop_reason.unwrap_or_default(),
            TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
        ))
    }
}

/// Claude through the Anthropic Messages API.
pub struct AnthropicModel {
    model_id: String,
    endpoint: String,
    api_key: String,
    api_version: String,
    adapter: ClaudeAdapter,
    transport: HttpTransport,
    buffers: BufferPool,
}

impl AnthropicModel {
    pub fn new<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        let model_id = model_id.into();
        let api_key = options.require_api_key(Vendor::Anthropic)?;
        Ok(Self {
            adapter: ClaudeAdapter::new(ClaudeFlavor::Anthropic {
                model: model_id.clone(),
            }),
            model_id,
            endpoint: options
                .endpoint
                .clone()
                .unwrap_or_else(|| ANTHROPIC_ENDPOINT.to_string()),
            api_key,
            api_version: options
                .api_version
                .clone()
                .unwrap_or_else(|| ANTHROPIC_API_VERSION.to_string()),
            transport: HttpTransport::new(Vendor::Anthropic, options)?,
            buffers: BufferPool::default(),
        })
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn vendor(&self) -> Vendor {
        Vendor::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        let headers = vec![
            ("x-api-key".to_string(), self.api_key.clone()),
            ("anthropic-version".to_string(), self.api_version.clone()),
        ];
        self.transport
            .complete(
                &self.adapter,
                &self.buffers,
                &self.endpoint,
                headers,
                request,
                cancel,
            )
            .await
    }
}
