use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

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
use crate::models::tool::{Tool, ToolChoice};

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DASHSCOPE_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const AZURE_DEFAULT_API_VERSION: &str = "2024-06-01";

lazy_static! {
    static ref FUNCTION_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").unwrap();
}

#[derive(Debug, Serialize)]
pub struct GptRequest {
    pub model: String,
    pub messages: Vec<GptMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GptTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<GptToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum GptMessage {
    System {
        content: String,
    },
    User {
        content: GptUserContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<GptToolCall>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GptUserContent {
    Text(String),
    Parts(Vec<GptContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GptContentPart {
    Text { text: String },
    ImageUrl { image_url: GptImageUrl },
}

#[derive(Debug, Serialize)]
pub struct GptImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GptToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: GptFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GptFunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
pub struct GptTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: GptFunction,
}

#[derive(Debug, Serialize)]
pub struct GptFunction {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: ObjectSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GptToolChoice {
    Mode(&'static str),
    Function {
        #[serde(rename = "type")]
        kind: &'static str,
        function: GptFunctionName,
    },
}

#[derive(Debug, Serialize)]
pub struct GptFunctionName {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct GptResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<GptChoice>,
    #[serde(default)]
    pub usage: Option<GptUsage>,
}

#[derive(Debug, Deserialize)]
pub struct GptChoice {
    #[serde(default)]
    pub message: GptResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub content_filter_results: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GptResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<GptToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GptUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl InstructionTurn for GptMessage {
    fn is_user_turn(&self) -> bool {
        matches!(self, GptMessage::User { .. })
    }

    fn append_instruction(&mut self, instruction: String) {
        if let GptMessage::User { content, .. } = self {
            match content {
                GptUserContent::Text(text) => {
                    text.push(' ');
                    text.push_str(&instruction);
                }
                GptUserContent::Parts(parts) => parts.push(GptContentPart::Text { text: instruction }),
            }
        }
    }

    fn prepend_instruction(&mut self, instruction: String) {
        if let GptMessage::User { content, .. } = self {
            match content {
                GptUserContent::Text(text) => *text = format!("{} {}", instruction, text),
                GptUserContent::Parts(parts) => {
                    parts.insert(0, GptContentPart::Text { text: instruction })
                }
            }
        }
    }

    fn instruction_turn(instruction: String) -> Self {
        GptMessage::User {
            content: GptUserContent::Text(instruction),
            name: None,
        }
    }
}

/// The services that speak the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptFlavor {
    OpenAi,
    Azure,
    /// Alibaba's OpenAI-compatible mode, which rejects `parallel_tool_calls`
    DashScope,
}

/// Translates between the canonical model and OpenAI chat completions.
#[derive(Debug, Clone)]
pub struct GptAdapter {
    model: String,
    flavor: GptFlavor,
}

impl GptAdapter {
    pub fn new<S: Into<String>>(model: S, flavor: GptFlavor) -> Self {
        Self {
            model: model.into(),
            flavor,
        }
    }

    fn user_message(&self, message: &Message) -> ChatResult<GptMessage> {
        let content = if let [ContentBlock::Text(text)] = message.contents.as_slice() {
            GptUserContent::Text(text.text.clone())
        } else {
            let parts = message
                .contents
                .iter()
                .map(|block| match block {
                    ContentBlock::Text(text) => Ok(GptContentPart::Text {
                        text: text.text.clone(),
                    }),
                    ContentBlock::Image(image) if image.data.is_empty() => {
                        Err(self.error("image content has no data"))
                    }
                    ContentBlock::Image(image) => Ok(GptContentPart::ImageUrl {
                        image_url: GptImageUrl {
                            url: format!(
                                "data:{};base64,{}",
                                image.media_type.as_str(),
                                image.base64_data()
                            ),
                        },
                    }),
                    other => Err(self.error(format!("user message cannot carry {}", other.kind()))),
                })
                .collect::<ChatResult<Vec<_>>>()?;
            GptUserContent::Parts(parts)
        };
        Ok(GptMessage::User {
            content,
            name: message.name.clone(),
        })
    }

    fn assistant_message(&self, message: &Message) -> ChatResult<GptMessage> {
        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in &message.contents {
            match block {
                ContentBlock::Text(text) => {
                    let text = text.text_or_refusal();
                    if !text.is_empty() {
                        texts.push(text);
                    }
                }
                ContentBlock::ToolCall(call) => tool_calls.push(GptToolCall {
                    id: call.id.clone(),
                    kind: function_type(),
                    function: GptFunctionCall {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()).to_string(),
                    },
                }),
                other => {
                    return Err(
                        self.error(format!("assistant message cannot carry {}", other.kind()))
                    )
                }
            }
        }
        Ok(GptMessage::Assistant {
            content: (!texts.is_empty()).then(|| texts.join("\n")),
            tool_calls,
            name: message.name.clone(),
        })
    }

    fn tool_messages(&self, message: &Message) -> ChatResult<Vec<GptMessage>> {
        message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult(result) => Ok(GptMessage::Tool {
                    tool_call_id: result.id.clone(),
                    content: result.result.to_text(),
                }),
                other => Err(self.error(format!("tool message cannot carry {}", other.kind()))),
            })
            .collect()
    }

    fn tool(&self, tool: &Tool) -> ChatResult<GptTool> {
        if !FUNCTION_NAME.is_match(&tool.name) {
            return Err(self.error(format!("invalid function name: {}", tool.name)));
        }
        let mut parameters = ObjectSchema::from(&tool.parameters);
        let strict = if tool.strict {
            parameters.additional_properties = Some(false);
            Some(true)
        } else {
            None
        };
        Ok(GptTool {
            kind: "function",
            function: GptFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters,
                strict,
            },
        })
    }

    fn tool_choice(choice: &ToolChoice) -> GptToolChoice {
        match choice {
            ToolChoice::Auto => GptToolChoice::Mode("auto"),
            ToolChoice::Required => GptToolChoice::Mode("required"),
            ToolChoice::Named(name) => GptToolChoice::Function {
                kind: "function",
                function: GptFunctionName { name: name.clone() },
            },
        }
    }

    fn error<S: Into<String>>(&self, message: S) -> ChatError {
        ChatError::translation(self.vendor(), message)
    }
}

impl Adapter for GptAdapter {
    type WireRequest = GptRequest;
    type WireResponse = GptResponse;

    fn vendor(&self) -> Vendor {
        match self.flavor {
            GptFlavor::OpenAi => Vendor::OpenAi,
            GptFlavor::Azure => Vendor::Azure,
            GptFlavor::DashScope => Vendor::DashScope,
        }
    }

    fn load(&self, request: &ModelRequest) -> ChatResult<GptRequest> {
        let vendor = self.vendor();
        check_tool_names(&request.tools, vendor)?;

        let mut messages = Vec::new();
        if let Some(system) = leading_system_prompt(request, vendor)? {
            messages.push(GptMessage::System { content: system });
        }

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
                Role::Tool => messages.extend(self.tool_messages(message)?),
            }
        }
        folder.finish(&mut messages);

        let tools = request
            .tools
            .iter()
            .map(|tool| self.tool(tool))
            .collect::<ChatResult<Vec<_>>>()?;
        let has_tools = !tools.is_empty();

        Ok(GptRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            tools,
            tool_choice: request
                .tool_choice
                .as_ref()
                .filter(|_| has_tools)
                .map(Self::tool_choice),
            parallel_tool_calls: match self.flavor {
                GptFlavor::DashScope => None,
                _ => request.parallel_tool_calls.filter(|_| has_tools),
            },
        })
    }

    fn dump(&self, _request: &ModelRequest, response: GptResponse) -> ChatResult<ModelResponse> {
        let vendor = self.vendor();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::protocol(vendor, "response has no choices"))?;

        let mut message = Message::assistant();
        if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
            message = message.with_text(content);
        }
        if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
            message = message.with_content(ContentBlock::refusal(refusal));
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = parse_arguments(vendor, &call.function)?;
            message = message.with_tool_call(call.id, call.function.name, arguments);
        }

        let usage = response.usage.unwrap_or_default();
        let mut dumped = ModelResponse::new(
            response.id,
            vec![message],
            choice.finish_reason.unwrap_or_default(),
            TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
        );
        dumped.content_filter_result = choice
            .content_filter_results
            .filter(|v| !v.is_null())
            .map(|v| v.to_string());
        Ok(dumped)
    }
}

fn parse_arguments(vendor: Vendor, function: &GptFunctionCall) -> ChatResult<Map<String, Value>> {
    if function.arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(&function.arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ChatError::protocol(
            vendor,
            format!("arguments for {} are not an object: {}", function.name, other),
        )),
        Err(e) => Err(ChatError::protocol(
            vendor,
            format!("arguments for {} are not valid JSON: {}", function.name, e),
        )),
    }
}

/// A chat-completions model on OpenAI, Azure OpenAI or DashScope.
pub struct OpenAiModel {
    model_id: String,
    url: String,
    headers: Vec<(String, String)>,
    adapter: GptAdapter,
    transport: HttpTransport,
    buffers: BufferPool,
}

impl OpenAiModel {
    pub fn openai<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        reject_api_version(Vendor::OpenAi, options)?;
        let api_key = options.require_api_key(Vendor::OpenAi)?;
        let url = options
            .endpoint
            .clone()
            .unwrap_or_else(|| OPENAI_ENDPOINT.to_string());
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", api_key))];
        Self::build(model_id.into(), GptFlavor::OpenAi, url, headers, options)
    }

    pub fn azure<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        let model_id = model_id.into();
        let api_key = options.require_api_key(Vendor::Azure)?;
        let endpoint = options
            .endpoint
            .as_deref()
            .ok_or_else(|| ChatError::configuration("azure requires an endpoint"))?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(&model_id),
            options
                .api_version
                .as_deref()
                .unwrap_or(AZURE_DEFAULT_API_VERSION)
        );
        let headers = vec![("api-key".to_string(), api_key)];
        Self::build(model_id, GptFlavor::Azure, url, headers, options)
    }

    pub fn dashscope<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        reject_api_version(Vendor::DashScope, options)?;
        let api_key = options.require_api_key(Vendor::DashScope)?;
        let url = options
            .endpoint
            .clone()
            .unwrap_or_else(|| DASHSCOPE_ENDPOINT.to_string());
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", api_key)),
            ("X-DashScope-SSE".to_string(), "disable".to_string()),
        ];
        Self::build(model_id.into(), GptFlavor::DashScope, url, headers, options)
    }

    fn build(
        model_id: String,
        flavor: GptFlavor,
        url: String,
        headers: Vec<(String, String)>,
        options: &ModelOptions,
    ) -> ChatResult<Self> {
        let adapter = GptAdapter::new(model_id.clone(), flavor);
        Ok(Self {
            transport: HttpTransport::new(adapter.vendor(), options)?,
            model_id,
            url,
            headers,
            adapter,
            buffers: BufferPool::default(),
        })
    }
}

fn reject_api_version(vendor: Vendor, options: &ModelOptions) -> ChatResult<()> {
    match options.api_version {
        Some(_) => Err(ChatError::configuration(format!(
            "{} does not support api_version",
            vendor
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn vendor(&self) -> Vendor {
        self.adapter.vendor()
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
                self.headers.clone(),
                request,
                cancel,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::ImageMediaType;
    use crate::models::response::FinishReason;
    use crate::models::schema::JsonSchema;
    use crate::models::tool::ToolParameters;
    use crate::models::value::ToolValue;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> GptAdapter {
        GptAdapter::new("gpt-4o", GptFlavor::OpenAi)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn add_tool() -> Tool {
        Tool::new(
            "add",
            "Add two numbers",
            ToolParameters::new()
                .with_property("x", JsonSchema::number())
                .with_property("y", JsonSchema::number())
                .with_required("x")
                .with_required("y"),
        )
    }

    #[test]
    fn test_load_messages() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![
            Message::system().with_text("You are a calculator."),
            Message::user().with_text("What is 1 + 2?"),
            Message::assistant()
                .with_text("Let me add.")
                .with_tool_call("call_1", "add", args(json!({"x": 1, "y": 2}))),
            Message::tool().with_tool_result("call_1", "add", ToolValue::Int(3)),
            Message::system().with_text("Answer with a number only."),
        ])
        .with_tools(vec![add_tool()]);

        let value = serde_json::to_value(adapter().load(&request)?)?;
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .starts_with("You are a calculator.\n[IMPORTANT!!]"));
        assert_eq!(messages[1], json!({"role": "user", "content": "What is 1 + 2?"}));
        assert_eq!(
            messages[2],
            json!({
                "role": "assistant",
                "content": "Let me add.",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "add", "arguments": "{\"x\":1,\"y\":2}"}
                }]
            })
        );
        assert_eq!(
            messages[3],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "3"})
        );
        // the trailing instruction follows a tool message, so it becomes its own user turn
        assert_eq!(
            messages[4],
            json!({
                "role": "user",
                "content": "<|begin_of_system_instruction|>Answer with a number only.<|end_of_system_instruction|>"
            })
        );
        Ok(())
    }

    #[test]
    fn test_one_tool_message_per_result() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![Message::tool()
            .with_tool_result("a", "add", ToolValue::Int(1))
            .with_tool_result("b", "add", ToolValue::Int(2))]);
        let value = serde_json::to_value(adapter().load(&request)?)?;
        assert_eq!(value["messages"].as_array().unwrap().len(), 2);
        assert_eq!(value["messages"][1]["tool_call_id"], "b");
        Ok(())
    }

    #[test]
    fn test_user_parts_with_image() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![
            Message::user()
                .with_name("alice")
                .with_text("Describe")
                .with_image(ImageMediaType::Jpeg, vec![1, 2, 3]),
            Message::system().with_text("Short answer."),
        ]);
        let value = serde_json::to_value(adapter().load(&request)?)?;
        assert_eq!(
            value["messages"][1],
            json!({
                "role": "user",
                "name": "alice",
                "content": [
                    {"type": "text", "text": "Describe"},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AQID"}},
                    {"type": "text", "text": "<|begin_of_system_instruction|>Short answer.<|end_of_system_instruction|>"}
                ]
            })
        );
        Ok(())
    }

    #[test]
    fn test_tools_and_choice() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![Message::user().with_text("hi")])
            .with_tools(vec![add_tool().with_strict(true)])
            .with_tool_choice(ToolChoice::Named("add".into()))
            .with_parallel_tool_calls(false);

        let value = serde_json::to_value(adapter().load(&request)?)?;
        assert_eq!(
            value["tools"][0],
            json!({
                "type": "function",
                "function": {
                    "name": "add",
                    "description": "Add two numbers",
                    "parameters": {
                        "type": "object",
                        "properties": {"x": {"type": "number"}, "y": {"type": "number"}},
                        "required": ["x", "y"],
                        "additionalProperties": false
                    },
                    "strict": true
                }
            })
        );
        assert_eq!(
            value["tool_choice"],
            json!({"type": "function", "function": {"name": "add"}})
        );
        assert_eq!(value["parallel_tool_calls"], false);

        let required = request.clone().with_tool_choice(ToolChoice::Required);
        let value = serde_json::to_value(adapter().load(&required)?)?;
        assert_eq!(value["tool_choice"], "required");
        Ok(())
    }

    #[test]
    fn test_tool_options_dropped_without_tools() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![Message::user().with_text("hi")])
            .with_tool_choice(ToolChoice::Auto)
            .with_parallel_tool_calls(true);
        let value = serde_json::to_value(adapter().load(&request)?)?;
        assert!(value.get("tool_choice").is_none());
        assert!(value.get("parallel_tool_calls").is_none());
        Ok(())
    }

    #[test]
    fn test_dashscope_drops_parallel_tool_calls() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![Message::user().with_text("hi")])
            .with_tools(vec![add_tool()])
            .with_parallel_tool_calls(true);
        let wire = GptAdapter::new("qwen-max", GptFlavor::DashScope).load(&request)?;
        assert_eq!(wire.parallel_tool_calls, None);
        assert_eq!(wire.tools[0].function.strict, None);
        Ok(())
    }

    #[test]
    fn test_invalid_function_name() {
        let request = ModelRequest::new(vec![Message::user().with_text("hi")]).with_tools(vec![
            Tool::new("bad name!", "nope", ToolParameters::new()),
        ]);
        assert!(matches!(
            adapter().load(&request),
            Err(ChatError::Translation { .. })
        ));
    }

    #[test]
    fn test_dump_tool_calls() -> anyhow::Result<()> {
        let response: GptResponse = serde_json::from_value(json!({
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"x\":1,\"y\":2}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 7, "total_tokens": 27}
        }))?;

        let dumped = adapter().dump(&ModelRequest::default(), response)?;
        assert_eq!(dumped.finish_reason, FinishReason::ToolCalls);
        assert_eq!(dumped.usage, TokenUsage::new(20, 7));
        let calls: Vec<_> = dumped.tool_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, args(json!({"x": 1, "y": 2})));
        Ok(())
    }

    #[test]
    fn test_dump_refusal_and_filters() -> anyhow::Result<()> {
        let response: GptResponse = serde_json::from_value(json!({
            "id": "chatcmpl-9",
            "choices": [{
                "message": {"role": "assistant", "content": null, "refusal": "I can't help with that.", "tool_calls": null},
                "finish_reason": "content_filter",
                "content_filter_results": {"hate": {"filtered": true}}
            }]
        }))?;

        let dumped = adapter().dump(&ModelRequest::default(), response)?;
        assert_eq!(dumped.finish_reason, FinishReason::ContentFilter);
        assert_eq!(
            dumped.content_filter_result.as_deref(),
            Some(r#"{"hate":{"filtered":true}}"#)
        );
        let ContentBlock::Text(text) = &dumped.messages[0].contents[0] else {
            panic!("expected refusal text");
        };
        assert_eq!(text.text_or_refusal(), "I can't help with that.");
        Ok(())
    }

    #[test]
    fn test_dump_errors() -> anyhow::Result<()> {
        let empty: GptResponse = serde_json::from_value(json!({"id": "x", "choices": []}))?;
        assert!(matches!(
            adapter().dump(&ModelRequest::default(), empty),
            Err(ChatError::Protocol { .. })
        ));

        let bad_args: GptResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"tool_calls": [{"id": "1", "type": "function", "function": {"name": "add", "arguments": "{oops"}}]},
                "finish_reason": "tool_calls"
            }]
        }))?;
        assert!(matches!(
            adapter().dump(&ModelRequest::default(), bad_args),
            Err(ChatError::Protocol { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"model": "gpt-4o", "temperature": 0.7})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-123",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello! How can I assist you today?", "tool_calls": null},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 15, "total_tokens": 27}
            })))
            .mount(&server)
            .await;

        let options = ModelOptions::new()
            .with_api_key("test_api_key")
            .with_endpoint(format!("{}/v1/chat/completions", server.uri()));
        let model = OpenAiModel::openai("gpt-4o", &options)?;
        let request = ModelRequest::new(vec![Message::user().with_text("Hello?")]).with_temperature(0.7);

        let response = model.complete(&request, &CancellationToken::new()).await?;
        assert_eq!(response.text(), "Hello! How can I assist you today?");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total(), 27);
        Ok(())
    }

    #[tokio::test]
    async fn test_azure_url_and_headers() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o-mini/chat/completions"))
            .and(query_param("api-version", "2024-10-21"))
            .and(header("api-key", "azure_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-az",
                "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let options = ModelOptions::new()
            .with_api_key("azure_key")
            .with_api_version("2024-10-21")
            .with_endpoint(format!("{}/", server.uri()));
        let model = OpenAiModel::azure("gpt-4o-mini", &options)?;
        assert_eq!(model.vendor(), Vendor::Azure);

        let request = ModelRequest::new(vec![Message::user().with_text("hi")]);
        let response = model.complete(&request, &CancellationToken::new()).await?;
        assert_eq!(response.text(), "hi");
        Ok(())
    }

    #[tokio::test]
    async fn test_dashscope_sends_sse_header() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-dashscope-sse", "disable"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-qw",
                "choices": [{"message": {"content": "ni hao"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let options = ModelOptions::new()
            .with_api_key("ds_key")
            .with_endpoint(server.uri());
        let model = OpenAiModel::dashscope("qwen-plus", &options)?;
        let request = ModelRequest::new(vec![Message::user().with_text("hello")]);
        let response = model.complete(&request, &CancellationToken::new()).await?;
        assert_eq!(response.text(), "ni hao");
        Ok(())
    }

    #[test]
    fn test_configuration_errors() {
        assert!(matches!(
            OpenAiModel::openai("gpt-4o", &ModelOptions::new()),
            Err(ChatError::Configuration(_))
        ));
        assert!(matches!(
            OpenAiModel::azure("gpt-4o", &ModelOptions::new().with_api_key("k")),
            Err(ChatError::Configuration(_))
        ));
        assert!(matches!(
            OpenAiModel::dashscope(
                "qwen-max",
                &ModelOptions::new().with_api_key("k").with_api_version("v1")
            ),
            Err(ChatError::Configuration(_))
        ));
    }
}
