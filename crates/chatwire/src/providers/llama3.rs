//! Llama 3 raw-prompt protocol.
//!
//! Llama 3 on Bedrock takes one prompt string and returns free text. Tool use is
//! simulated inside that text: the prompt declares the tools and asks for JSON calls,
//! and the parser recovers `{"name": ..., "parameters": {...}}` objects from the
//! model's continuation. Anything that does not parse cleanly stays plain text.

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::ops::Range;
use tracing::warn;

use super::base::{Adapter, Vendor};
use super::utils::{
    check_tool_names, generate_call_id, has_injected_system, system_texts, ObjectSchema,
    BEGIN_SYSTEM_INSTRUCTION, END_SYSTEM_INSTRUCTION, SYSTEM_INSTRUCTION_WARNING,
};
use crate::errors::{ChatError, ChatResult};
use crate::models::content::{ContentBlock, ToolCall};
use crate::models::message::Message;
use crate::models::request::ModelRequest;
use crate::models::response::{ModelResponse, TokenUsage};
use crate::models::role::Role;
use crate::models::tool::Tool;

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
pub const START_HEADER: &str = "<|start_header_id|>";
pub const END_HEADER: &str = "<|end_header_id|>";
pub const END_OF_TURN: &str = "<|eot_id|>";
pub const END_OF_MESSAGE: &str = "<|eom_id|>";
pub const PYTHON_TAG: &str = "<|python_tag|>";

pub const ASSISTANT_HEADER: &str = "<|start_header_id|>assistant<|end_header_id|>";

/// Tokens the parser splits generated text on.
const GENERATION_SPECIAL_TOKENS: [&str; 3] = [ASSISTANT_HEADER, PYTHON_TAG, END_OF_TURN];

pub const RESPONSE_ID: &str = "id-bedrock-llama3";
pub const DEFAULT_MAX_GEN_LEN: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_TOP_P: f64 = 0.99;

/// Shortest text that can hold a call such as `{"name":"x"}`.
const MIN_CALL_LENGTH: usize = 12;

pub const FUNCTION_CALL_PROMPT: &str = "You have function calling capabilities. When you receive a function call response, use the output to format an answer to the original user question.\n\nGiven the following functions, please respond with a JSON for a function call with its proper arguments that best answers the given prompt.\n\nRespond in the format: \n{\"name\": function name, \"parameters\": dictionary of argument name and its value}\nDo not use variables.\n\n";

#[derive(Debug, Clone, Copy)]
enum HeaderRole {
    System,
    User,
    Assistant,
    IPython,
}

impl HeaderRole {
    fn as_str(&self) -> &'static str {
        match self {
            HeaderRole::System => "system",
            HeaderRole::User => "user",
            HeaderRole::Assistant => "assistant",
            HeaderRole::IPython => "ipython",
        }
    }
}

#[derive(Serialize)]
struct FunctionDeclaration<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: ObjectSchema,
}

#[derive(Serialize)]
struct FunctionCallJson<'a> {
    name: &'a str,
    parameters: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct FunctionOutputJson<'a> {
    call_id: &'a str,
    name: &'a str,
    output: Value,
}

#[derive(Deserialize)]
struct GeneratedCall {
    #[serde(default)]
    name: String,
    #[serde(default, alias = "arguments")]
    parameters: Option<Map<String, Value>>,
}

/// Serializes a canonical request into a single Llama 3 prompt.
pub struct PromptBuilder {
    prompt: String,
}

impl PromptBuilder {
    pub fn build(request: &ModelRequest) -> ChatResult<String> {
        check_tool_names(&request.tools, Vendor::Bedrock)?;

        let mut builder = PromptBuilder {
            prompt: String::from(BEGIN_OF_TEXT),
        };
        let start = request.conversation_start();

        for message in &request.messages[..start] {
            let texts = system_texts(message, Vendor::Bedrock)?;
            builder.block(HeaderRole::System, &texts.join("\n"));
        }
        if has_injected_system(request) {
            builder.block(HeaderRole::System, SYSTEM_INSTRUCTION_WARNING.trim_end());
        }
        if !request.tools.is_empty() {
            let declarations = builder.tool_declarations(&request.tools)?;
            builder.block(HeaderRole::System, &declarations);
        }

        for message in &request.messages[start..] {
            match message.role {
                Role::System => builder.injected_system(message)?,
                Role::User => builder.user(message)?,
                Role::Assistant => builder.assistant(message)?,
                Role::Tool => builder.tool_results(message)?,
            }
        }

        builder.header(HeaderRole::Assistant);
        builder.prompt.push_str("\n\n");
        Ok(builder.prompt)
    }

    fn header(&mut self, role: HeaderRole) {
        self.prompt.push_str(START_HEADER);
        self.prompt.push_str(role.as_str());
        self.prompt.push_str(END_HEADER);
    }

    fn block(&mut self, role: HeaderRole, body: &str) {
        self.header(role);
        self.prompt.push_str("\n\n");
        self.prompt.push_str(body);
        self.prompt.push_str(END_OF_TURN);
    }

    fn tool_declarations(&self, tools: &[Tool]) -> ChatResult<String> {
        let mut body = String::from(FUNCTION_CALL_PROMPT);
        for (index, tool) in tools.iter().enumerate() {
            let declaration = FunctionDeclaration {
                kind: "function",
                function: FunctionSpec {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: ObjectSchema::from(&tool.parameters),
                },
            };
            let mut json = Vec::new();
            let mut serializer =
                serde_json::Serializer::with_formatter(&mut json, PrettyFormatter::with_indent(b"    "));
            declaration
                .serialize(&mut serializer)
                .map_err(|e| error(format!("failed to encode tool {}: {}", tool.name, e)))?;

            let json = String::from_utf8(json)
                .map_err(|e| error(format!("failed to encode tool {}: {}", tool.name, e)))?;
            body.push_str(&format!("#{} function {}\n", index + 1, tool.name));
            body.push_str(&json);
            body.push_str("\n\n");
        }
        Ok(body.trim_end().to_string())
    }

    /// The system header is unreliable mid-conversation, so instructions ride in a user turn.
    fn injected_system(&mut self, message: &Message) -> ChatResult<()> {
        let texts = system_texts(message, Vendor::Bedrock)?;
        let body = format!(
            "{}{}{}",
            BEGIN_SYSTEM_INSTRUCTION,
            texts.join("\n"),
            END_SYSTEM_INSTRUCTION
        );
        self.block(HeaderRole::User, &body);
        Ok(())
    }

    fn user(&mut self, message: &Message) -> ChatResult<()> {
        let texts = message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => Ok(text.text.as_str()),
                other => Err(error(format!("user message cannot carry {}", other.kind()))),
            })
            .collect::<ChatResult<Vec<_>>>()?;
        self.block(HeaderRole::User, &texts.join("\n"));
        Ok(())
    }

    fn assistant(&mut self, message: &Message) -> ChatResult<()> {
        if let Some(other) = message
            .contents
            .iter()
            .find(|b| !matches!(b, ContentBlock::Text(_) | ContentBlock::ToolCall(_)))
        {
            return Err(error(format!("assistant message cannot carry {}", other.kind())));
        }

        let body = if message.has_tool_calls() {
            message
                .tool_calls()
                .map(|call| {
                    serde_json::to_string(&FunctionCallJson {
                        name: &call.name,
                        parameters: &call.arguments,
                    })
                    .map_err(|e| error(format!("failed to encode call {}: {}", call.name, e)))
                })
                .collect::<ChatResult<Vec<_>>>()?
                .join("\n")
        } else {
            message
                .contents
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text(text) => Some(text.text_or_refusal()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.block(HeaderRole::Assistant, &body);
        Ok(())
    }

    fn tool_results(&mut self, message: &Message) -> ChatResult<()> {
        let outputs = message
            .contents
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult(result) => serde_json::to_string(&FunctionOutputJson {
                    call_id: &result.id,
                    name: &result.name,
                    output: result.result.to_output(),
                })
                .map_err(|e| error(format!("failed to encode result {}: {}", result.name, e))),
                other => Err(error(format!("tool message cannot carry {}", other.kind()))),
            })
            .collect::<ChatResult<Vec<_>>>()?;
        self.block(HeaderRole::IPython, &outputs.join("\n"));
        Ok(())
    }
}

fn error<S: Into<String>>(message: S) -> ChatError {
    ChatError::translation(Vendor::Bedrock, message)
}

/// A run of generated text, either literal or one special token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: Range<usize>,
    pub special: bool,
}

/// Splits generated text on the special tokens a model may emit mid-generation.
///
/// Every `<|` is checked against the token table; a miss is ordinary text. The
/// segments cover the input exactly.
pub fn segment(text: &str) -> Vec<Segment> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] != b'<' || bytes[i + 1] != b'|' {
            i += 1;
            continue;
        }
        match GENERATION_SPECIAL_TOKENS
            .iter()
            .find(|token| text[i..].starts_with(*token))
        {
            Some(token) => {
                if start < i {
                    segments.push(Segment {
                        range: start..i,
                        special: false,
                    });
                }
                segments.push(Segment {
                    range: i..i + token.len(),
                    special: true,
                });
                i += token.len();
                start = i;
            }
            None => i += 2,
        }
    }
    if start < bytes.len() {
        segments.push(Segment {
            range: start..bytes.len(),
            special: false,
        });
    }
    segments
}

/// Splits text into consecutive top-level JSON objects, returning their byte spans.
///
/// Whitespace and `;` may separate objects; anything else outside an object, an
/// unterminated string, or unbalanced braces fails the whole split.
pub fn json_split(text: &str) -> Option<Vec<(usize, usize)>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_whitespace() || b == b';' => i += 1,
            b'{' => {
                let start = i;
                let mut depth = 0usize;
                let mut in_string = false;
                loop {
                    let b = *bytes.get(i)?;
                    if in_string {
                        match b {
                            b'\\' => i += 1,
                            b'"' => in_string = false,
                            _ => {}
                        }
                    } else {
                        match b {
                            b'"' => in_string = true,
                            b'{' => depth += 1,
                            b'}' => {
                                depth -= 1;
                                if depth == 0 {
                                    i += 1;
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    i += 1;
                }
                spans.push((start, i));
            }
            _ => return None,
        }
    }
    Some(spans)
}

/// Cheap checks that rule out most prose before any JSON decoding.
fn looks_like_call(tools: &[Tool], text: &str) -> bool {
    text.len() >= MIN_CALL_LENGTH
        && text.starts_with('{')
        && text.ends_with('}')
        && text.contains("\"name\"")
        && tools
            .iter()
            .any(|tool| text.contains(&format!("\"{}\"", tool.name)))
}

/// All calls in the segment, or `None` if any object fails to decode or names an
/// undeclared tool.
fn parse_function_calls(tools: &[Tool], text: &str) -> Option<Vec<ToolCall>> {
    let spans = json_split(text)?;
    if spans.is_empty() {
        return None;
    }
    spans
        .into_iter()
        .map(|(start, end)| {
            let call: GeneratedCall = serde_json::from_str(&text[start..end]).ok()?;
            if call.name.is_empty() || !tools.iter().any(|tool| tool.name == call.name) {
                return None;
            }
            Some(ToolCall {
                id: generate_call_id(),
                name: call.name,
                arguments: call.parameters.unwrap_or_default(),
            })
        })
        .collect()
}

/// Content recovered from one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGeneration {
    pub contents: Vec<ContentBlock>,
    pub has_tool_calls: bool,
}

/// Recovers text and tool calls from a raw Llama 3 continuation.
pub fn parse_generation(tools: &[Tool], generation: &str) -> ParsedGeneration {
    let text = generation.trim();
    let text = text.strip_suffix(END_OF_TURN).unwrap_or(text).trim();

    let mut contents = Vec::new();
    let mut has_tool_calls = false;
    for segment in segment(text).into_iter().filter(|s| !s.special) {
        let piece = text[segment.range].trim();
        if piece.is_empty() {
            continue;
        }
        if !tools.is_empty() && looks_like_call(tools, piece) {
            match parse_function_calls(tools, piece) {
                Some(calls) => {
                    has_tool_calls = true;
                    contents.extend(calls.into_iter().map(ContentBlock::ToolCall));
                    continue;
                }
                None => warn!(segment = piece, "generated text resembles a tool call but did not parse"),
            }
        }
        contents.push(ContentBlock::text(piece));
    }

    ParsedGeneration {
        contents,
        has_tool_calls,
    }
}

#[derive(Debug, Serialize)]
pub struct Llama3Request {
    pub prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_gen_len: u32,
}

#[derive(Debug, Deserialize)]
pub struct Llama3Response {
    #[serde(default)]
    pub generation: String,
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub generation_token_count: u64,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Translates between the canonical model and Bedrock's Llama 3 invoke body.
#[derive(Debug, Clone, Default)]
pub struct Llama3Adapter;

impl Adapter for Llama3Adapter {
    type WireRequest = Llama3Request;
    type WireResponse = Llama3Response;

    fn vendor(&self) -> Vendor {
        Vendor::Bedrock
    }

    fn load(&self, request: &ModelRequest) -> ChatResult<Llama3Request> {
        Ok(Llama3Request {
            prompt: PromptBuilder::build(request)?,
            temperature: request
                .temperature
                .map(|t| t * 0.5)
                .unwrap_or(DEFAULT_TEMPERATURE),
            top_p: request
                .top_p
                .map(|p| p.clamp(0.001, 0.999))
                .unwrap_or(DEFAULT_TOP_P),
            max_gen_len: request.max_tokens.unwrap_or(DEFAULT_MAX_GEN_LEN),
        })
    }

    fn dump(&self, request: &ModelRequest, response: Llama3Response) -> ChatResult<ModelResponse> {
        if response.generation.is_empty() {
            return Err(ChatError::protocol(Vendor::Bedrock, "empty generation"));
        }
        let parsed = parse_generation(&request.tools, &response.generation);
        let finish_reason = if parsed.has_tool_calls {
            "tool_calls".to_string()
        } else {
            response.stop_reason.unwrap_or_default()
        };
        let message = Message {
            contents: parsed.contents,
            ..Message::assistant()
        };
        Ok(ModelResponse::new(
            RESPONSE_ID,
            vec![message],
            finish_reason,
            TokenUsage::new(response.prompt_token_count, response.generation_token_count),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::response::FinishReason;
    use crate::models::schema::JsonSchema;
    use crate::models::tool::ToolParameters;
    use crate::models::value::ToolValue;
    use indoc::indoc;
    use serde_json::json;

    fn add_tool() -> Tool {
        Tool::new(
            "add",
            "Add two numbers",
            ToolParameters::new()
                .with_property("x", JsonSchema::integer())
                .with_property("y", JsonSchema::integer())
                .with_required("x")
                .with_required("y"),
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_json_split() {
        assert_eq!(json_split(r#"{"a":1}{"b":2}"#), Some(vec![(0, 7), (7, 14)]));
        assert_eq!(json_split(r#"{"a":1}"#), Some(vec![(0, 7)]));
        assert_eq!(json_split(r#"{"a":1"#), None);
        assert_eq!(json_split(r#"{"a":"1}"#), None);
        assert_eq!(json_split(r#"{"a":1}; {"b":2}"#), Some(vec![(0, 7), (9, 16)]));
        assert_eq!(json_split(r#"{"a":1} x"#), None);
        assert_eq!(json_split(""), Some(vec![]));
    }

    #[test]
    fn test_json_split_ignores_braces_in_strings() {
        let text = r#"{"a":"}{\"}"}{"b":"\\"}"#;
        let spans = json_split(text).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].0..spans[0].1], r#"{"a":"}{\"}"}"#);
        assert_eq!(&text[spans[1].0..spans[1].1], r#"{"b":"\\"}"#);
    }

    #[test]
    fn test_segment_covers_input() {
        let text = "Hello<|python_tag|>{\"x\":1}<|eot_id|><|not_a_token|> tail";
        let segments = segment(text);
        assert_eq!(
            segments,
            vec![
                Segment { range: 0..5, special: false },
                Segment { range: 5..19, special: true },
                Segment { range: 19..26, special: false },
                Segment { range: 26..36, special: true },
                Segment { range: 36..text.len(), special: false },
            ]
        );
        let covered: usize = segments.iter().map(|s| s.range.len()).sum();
        assert_eq!(covered, text.len());
    }

    #[test]
    fn test_segment_handles_trailing_marker_start() {
        assert_eq!(
            segment("abc<|"),
            vec![Segment { range: 0..5, special: false }]
        );
        assert_eq!(segment(""), vec![]);
    }

    #[test]
    fn test_parse_single_call() {
        let parsed = parse_generation(
            &[add_tool()],
            r#"{"name":"add","parameters":{"x":1,"y":2}}"#,
        );
        assert!(parsed.has_tool_calls);
        assert_eq!(parsed.contents.len(), 1);
        let call = parsed.contents[0].as_tool_call().unwrap();
        assert_eq!(call.name, "add");
        assert_eq!(call.arguments, args(json!({"x": 1, "y": 2})));
        let id: u32 = call.id.parse().unwrap();
        assert!((100001..=999999).contains(&id));
    }

    #[test]
    fn test_prose_mentioning_name_is_text() {
        let generation = r#"{"name" is a common JSON key, but nothing here calls a tool}"#;
        let parsed = parse_generation(&[add_tool()], generation);
        assert!(!parsed.has_tool_calls);
        assert_eq!(parsed.contents, vec![ContentBlock::text(generation)]);
    }

    #[test]
    fn test_undeclared_tool_rejects_whole_segment() {
        let generation = r#"{"name":"add","parameters":{"x":1}} {"name":"sub","parameters":{"add":1}}"#;
        let parsed = parse_generation(&[add_tool()], generation);
        assert!(!parsed.has_tool_calls);
        assert_eq!(parsed.contents, vec![ContentBlock::text(generation)]);
    }

    #[test]
    fn test_multiple_calls_and_tokens() {
        let generation = indoc! {r#"
            <|python_tag|>{"name": "add", "parameters": {"x": 1, "y": 2}}
            {"name": "add", "parameters": {"x": 3, "y": 4}}<|eot_id|>
        "#};
        let parsed = parse_generation(&[add_tool()], generation);
        assert!(parsed.has_tool_calls);
        let calls: Vec<_> = parsed
            .contents
            .iter()
            .filter_map(ContentBlock::as_tool_call)
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments, args(json!({"x": 3, "y": 4})));
    }

    #[test]
    fn test_text_around_calls_is_preserved() {
        let generation = "Let me add those.<|python_tag|>{\"name\":\"add\",\"parameters\":{}}";
        let parsed = parse_generation(&[add_tool()], generation);
        assert_eq!(parsed.contents.len(), 2);
        assert_eq!(parsed.contents[0].as_text(), Some("Let me add those."));
        assert!(parsed.contents[1].as_tool_call().unwrap().arguments.is_empty());
    }

    #[test]
    fn test_no_tools_means_text_only() {
        let parsed = parse_generation(&[], "  {\"name\":\"add\",\"parameters\":{}}  <|eot_id|>");
        assert!(!parsed.has_tool_calls);
        assert_eq!(parsed.contents[0].as_text(), Some("{\"name\":\"add\",\"parameters\":{}}"));
    }

    #[test]
    fn test_build_prompt() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![
            Message::system().with_text("You are a calculator."),
            Message::user().with_text("Add 1 and 2."),
            Message::assistant().with_text("Sure.").with_tool_call(
                "100001",
                "add",
                args(json!({"x": 1, "y": 2})),
            ),
            Message::tool().with_tool_result("100001", "add", ToolValue::Int(3)),
            Message::system().with_text("Answer briefly."),
        ])
        .with_tools(vec![add_tool()]);

        let prompt = PromptBuilder::build(&request)?;
        let expected = [
            "<|begin_of_text|>",
            "<|start_header_id|>system<|end_header_id|>\n\nYou are a calculator.<|eot_id|>",
            "<|start_header_id|>system<|end_header_id|>\n\n[IMPORTANT!!]\n",
        ]
        .concat();
        assert!(prompt.starts_with(&expected), "{}", prompt);
        assert!(prompt.contains(
            "#1 function add\n{\n    \"type\": \"function\",\n    \"function\": {\n        \"name\": \"add\","
        ));
        assert!(prompt.contains(
            "<|start_header_id|>user<|end_header_id|>\n\nAdd 1 and 2.<|eot_id|>"
        ));
        assert!(prompt.contains(
            "<|start_header_id|>assistant<|end_header_id|>\n\n{\"name\":\"add\",\"parameters\":{\"x\":1,\"y\":2}}<|eot_id|>"
        ));
        assert!(!prompt.contains("Sure."));
        assert!(prompt.contains(
            "<|start_header_id|>ipython<|end_header_id|>\n\n{\"call_id\":\"100001\",\"name\":\"add\",\"output\":\"3\"}<|eot_id|>"
        ));
        assert!(prompt.ends_with(
            "<|start_header_id|>user<|end_header_id|>\n\n<|begin_of_system_instruction|>Answer briefly.<|end_of_system_instruction|><|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
        ));
        Ok(())
    }

    #[test]
    fn test_build_prompt_refusal_fallback() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![
            Message::user().with_text("Do something bad."),
            Message::assistant().with_content(ContentBlock::refusal("I won't.")),
            Message::user().with_text("Okay."),
        ]);
        let prompt = PromptBuilder::build(&request)?;
        assert!(prompt.contains("<|start_header_id|>assistant<|end_header_id|>\n\nI won't.<|eot_id|>"));
        assert!(!prompt.contains("[IMPORTANT!!]"));
        Ok(())
    }

    #[test]
    fn test_tool_declarations_keep_unicode() -> anyhow::Result<()> {
        let tool = Tool::new(
            "météo",
            "Prévision à 3 jours ☀",
            ToolParameters::new().with_property("ville", JsonSchema::string()),
        );
        let request =
            ModelRequest::new(vec![Message::user().with_text("Quel temps?")]).with_tools(vec![tool]);

        let prompt = PromptBuilder::build(&request)?;
        assert!(prompt.contains("#1 function météo\n{"));
        assert!(prompt.contains("\"description\": \"Prévision à 3 jours ☀\""));
        assert!(!prompt.contains('\u{FFFD}'));
        Ok(())
    }

    #[test]
    fn test_build_rejects_images() {
        let request = ModelRequest::new(vec![Message::user()
            .with_image(crate::models::content::ImageMediaType::Png, vec![1])]);
        assert!(matches!(
            PromptBuilder::build(&request),
            Err(ChatError::Translation { .. })
        ));
    }

    #[test]
    fn test_load_parameters() -> anyhow::Result<()> {
        let defaults = Llama3Adapter.load(&ModelRequest::new(vec![Message::user().with_text("hi")]))?;
        assert_eq!(defaults.temperature, 0.5);
        assert_eq!(defaults.top_p, 0.99);
        assert_eq!(defaults.max_gen_len, 1000);

        let tuned = Llama3Adapter.load(
            &ModelRequest::new(vec![Message::user().with_text("hi")])
                .with_temperature(0.8)
                .with_top_p(1.0)
                .with_max_tokens(256),
        )?;
        assert_eq!(tuned.temperature, 0.4);
        assert_eq!(tuned.top_p, 0.999);
        assert_eq!(tuned.max_gen_len, 256);
        Ok(())
    }

    #[test]
    fn test_dump() -> anyhow::Result<()> {
        let request = ModelRequest::new(vec![Message::user().with_text("1+2?")])
            .with_tools(vec![add_tool()]);

        let response: Llama3Response = serde_json::from_value(json!({
            "generation": "{\"name\":\"add\",\"parameters\":{\"x\":1,\"y\":2}}<|eot_id|>",
            "prompt_token_count": 120,
            "generation_token_count": 18,
            "stop_reason": "stop"
        }))?;
        let dumped = Llama3Adapter.dump(&request, response)?;
        assert_eq!(dumped.id, RESPONSE_ID);
        assert_eq!(dumped.finish_reason, FinishReason::ToolCalls);
        assert_eq!(dumped.usage, TokenUsage::new(120, 18));

        let response: Llama3Response = serde_json::from_value(json!({
            "generation": "The answer is 3.",
            "stop_reason": "length"
        }))?;
        let dumped = Llama3Adapter.dump(&request, response)?;
        assert_eq!(dumped.finish_reason, FinishReason::Length);
        assert_eq!(dumped.text(), "The answer is 3.");

        let empty: Llama3Response = serde_json::from_value(json!({"generation": ""}))?;
        assert!(matches!(
            Llama3Adapter.dump(&request, empty),
            Err(ChatError::Protocol { .. })
        ));
        Ok(())
    }
}
