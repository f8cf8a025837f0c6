use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::base::{Adapter, ChatModel, Vendor};
use super::configs::ModelOptions;
use super::http::HttpTransport;
use super::utils::{
    check_tool_names, generate_call_id, leading_system_prompt, system_texts, InstructionFolder,
    InstructionTurn, ObjectSchema,
};
use crate::buffer::BufferPool;
use crate::errors::{ChatError, ChatResult};
use crate::models::content::ContentBlock;
use crate::models::message::Message;
use crate::models::request::ModelRequest;
use crate::models::response::{ModelResponse, TokenUsage};
use crate::models::role::Role;
use crate::token_counter::estimate_tokens;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
const CHAT_PATH: &str = "/api/chat";

const CONTEXT_BUCKETS: [usize; 7] = [8000, 16000, 24000, 32000, 48000, 64000, 128000];

#[derive(Debug, Serialize)]
pub struct OllamaRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<OllamaTool>,
    pub stream: bool,
    pub options: OllamaOptions,
}

#[derive(Debug, Default, Serialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub num_ctx: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OllamaRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize)]
pub struct OllamaMessage {
    pub role: OllamaRole,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OllamaToolCall>,
}

impl OllamaMessage {
    fn new(role: OllamaRole, content: String) -> Self {
        Self {
            role,
            content,
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct OllamaTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: OllamaFunction,
}

#[derive(Debug, Serialize)]
pub struct OllamaFunction {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

#[derive(Debug, Deserialize)]
pub struct OllamaResponse {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub message: OllamaResponseMessage,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct OllamaResponseMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

impl InstructionTurn for OllamaMessage {
    fn is_user_turn(&self) -> bool {
        self.role == OllamaRole::User
    }

    fn append_instruction(&mut self, instruction: String) {
        if !self.content.is_empty() {
            self.content.push(' ');
        }
        self.content.push_str(&instruction);
    }

    fn prepend_instruction(&mut self, instruction: String) {
        self.content = if self.content.is_empty() {
            instruction
        } else {
            format!("{} {}", instruction, self.content)
        };
    }

    fn instruction_turn(instruction: String) -> Self {
        OllamaMessage::new(OllamaRole::User, instruction)
    }
}

/// Translates between the canonical model and the Ollama chat API.
#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    model: String,
}

impl OllamaAdapter {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// One wire message per block; Ollama has no multi-part content.
    fn user_messages(&self, message: &Message) -> ChatResult<Vec<OllamaMessage>> {
        message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => {
                    Ok(OllamaMessage::new(OllamaRole::User, text.text.clone()))
                }
                ContentBlock::Image(image) if image.data.is_empty() => {
                    Err(self.error("image content has no data"))
                }
                ContentBlock::Image(image) => {
                    let mut wire = OllamaMessage::new(OllamaRole::User, String::new());
                    wire.images.push(image.base64_data());
                    Ok(wire)
                }
                other => Err(self.error(format!("user message cannot carry {}", other.kind()))),
            })
            .collect()
    }

    fn assistant_message(&self, message: &Message) -> ChatResult<OllamaMessage> {
        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in &message.contents {
            match block {
                ContentBlock::Text(text) => texts.push(text.text_or_refusal()),
                ContentBlock::ToolCall(call) => tool_calls.push(OllamaToolCall {
                    function: OllamaFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                }),
                other => {
                    return Err(
                        self.error(format!("assistant message cannot carry {}", other.kind()))
                    )
                }
            }
        }
        let mut wire = OllamaMessage::new(OllamaRole::Assistant, texts.join("\n"));
        wire.tool_calls = tool_calls;
        Ok(wire)
    }

    fn tool_messages(&self, message: &Message) -> ChatResult<Vec<OllamaMessage>> {
        message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult(result) => Ok(OllamaMessage::new(
                    OllamaRole::Tool,
                    json!({ "output": result.result.to_text() }).to_string(),
                )),
                other => Err(self.error(format!("tool message cannot carry {}", other.kind()))),
            })
            .collect()
    }

    fn error<S: Into<String>>(&self, message: S) -> ChatError {
        ChatError::translation(Vendor::Ollama, message)
    }
}

impl Adapter for OllamaAdapter {
    type WireRequest = OllamaRequest;
    type WireResponse = OllamaResponse;

    fn vendor(&self) -> Vendor {
        Vendor::Ollama
    }

    fn load(&self, request: &ModelRequest) -> ChatResult<OllamaRequest> {
        check_tool_names(&request.tools, Vendor::Ollama)?;

        let mut messages = Vec::new();
        if let Some(system) = leading_system_prompt(request, Vendor::Ollama)? {
            messages.push(OllamaMessage::new(OllamaRole::System, system));
        }

        let mut folder = InstructionFolder::new();
        for message in &request.messages[request.conversation_start()..] {
            if message.contents.is_empty() {
                return Err(self.error(format!("{} message has empty content", message.role)));
            }
            match message.role {
                Role::System => {
                    let text = system_texts(message, Vendor::Ollama)?.join("\n");
                    folder.fold(&mut messages, text);
                }
                Role::User => {
                    let mut turns = self.user_messages(message)?;
                    if let Some(first) = turns.first_mut() {
                        folder.attach(first);
                    }
                    messages.extend(turns);
                }
                Role::Assistant => messages.push(self.assistant_message(message)?),
                Role::Tool => messages.extend(self.tool_messages(message)?),
            }
        }
        folder.finish(&mut messages);

        let tools = request
            .tools
            .iter()
            .map(|tool| OllamaTool {
                kind: "function",
                function: OllamaFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: ObjectSchema::from(&tool.parameters),
                },
            })
            .collect();

        let num_ctx = guess_context_length(&self.model, estimate_request_tokens(&messages));
        Ok(OllamaRequest {
            model: self.model.clone(),
            messages,
            tools,
            stream: false,
            options: OllamaOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                num_ctx,
            },
        })
    }

    fn dump(&self, _request: &ModelRequest, response: OllamaResponse) -> ChatResult<ModelResponse> {
        let mut message = Message::assistant();
        if !response.message.content.is_empty() {
            message = message.with_text(response.message.content);
        }
        let calls = response.message.tool_calls.unwrap_or_default();
        let has_calls = !calls.is_empty();
        for call in calls {
            message = message.with_tool_call(
                generate_call_id(),
                call.function.name,
                call.function.arguments,
            );
        }

        let finish_reason = if has_calls {
            "tool_calls".to_string()
        } else {
            response
                .done_reason
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "stop".to_string())
        };

        Ok(ModelResponse::new(
            response.created_at,
            vec![message],
            finish_reason,
            TokenUsage::new(response.prompt_eval_count, response.eval_count),
        ))
    }
}

/// Rough prompt size: a fixed overhead plus every message and tool call argument.
fn estimate_request_tokens(messages: &[OllamaMessage]) -> usize {
    let mut tokens = 100;
    for message in messages {
        tokens += 10 + estimate_tokens(&message.content);
        for call in &message.tool_calls {
            tokens += 100;
            for (key, value) in &call.function.arguments {
                tokens += 10 + estimate_tokens(key);
                tokens += match value {
                    Value::String(s) => estimate_tokens(s),
                    _ => 100,
                };
            }
        }
    }
    tokens
}

/// Picks `num_ctx`: the smallest bucket that fits the prompt, capped by the model's window.
fn guess_context_length(model: &str, estimated_tokens: usize) -> usize {
    let bucket = CONTEXT_BUCKETS
        .iter()
        .copied()
        .find(|&bucket| estimated_tokens <= bucket)
        .unwrap_or(CONTEXT_BUCKETS[CONTEXT_BUCKETS.len() - 1]);
    bucket.min(model_context_window(model))
}

fn model_context_window(model: &str) -> usize {
    let model = model.to_lowercase();
    let family = |prefix: &str| model.starts_with(prefix);
    if family("llama3.1") || family("llama3.2") || family("llama3.3") {
        128000
    } else if family("llama3") {
        8192
    } else if family("llama2") {
        2048
    } else if family("qwen2") {
        if model.contains("72b") || model.contains("7b") {
            128000
        } else {
            32768
        }
    } else if family("qwen") {
        32768
    } else if family("gemma2") {
        8192
    } else if family("phi3.5") {
        128000
    } else if family("phi3") {
        if model.contains("128k") {
            128000
        } else {
            4096
        }
    } else if family("phi") {
        2048
    } else if family("mistral") {
        32768
    } else if family("vicuna") {
        2048
    } else if family("deepseek-coder-v2") {
        163840
    } else {
        4096
    }
}

/// A model served by a local or remote Ollama instance.
pub struct OllamaModel {
    model_id: String,
    url: String,
    adapter: OllamaAdapter,
    transport: HttpTransport,
    buffers: BufferPool,
}

impl OllamaModel {
    pub fn new<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        if options.api_version.is_some() {
            return Err(ChatError::configuration("ollama does not support api_version"));
        }
        let model_id = model_id.into();
        let host = options.endpoint.as_deref().unwrap_or(OLLAMA_HOST);
        let host = host.trim_end_matches('/');
        let url = if host.ends_with(CHAT_PATH) {
            host.to_string()
        } else {
            format!("{}{}", host, CHAT_PATH)
        };
        Ok(Self {
            adapter: OllamaAdapter::new(model_id.clone()),
            model_id,
            url,
            transport: HttpTransport::new(Vendor::Ollama, options)?,
            buffers: BufferPool::default(),
        })
    }
}

#[async_trait]
impl ChatModel for OllamaModel {
    fn vendor(&self) -> Vendor {
        Vendor::Ollama
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        self.transport
            .complete(
                &self.adapter,
                &self.buffers,
                &self.url,
                Vec::new(),
                request,
                cancel,
            )
            .await
    }
}
