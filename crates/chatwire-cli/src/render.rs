use anyhow::Result;
use bat::WrappingMode;
use chatwire::models::content::{ContentBlock, ToolCall, ToolResult};
use chatwire::models::message::Message;
use chatwire::models::response::TokenUsage;
use chatwire::models::value::ToolValue;
use console::style;

const THEME: &str = "zenburn";

fn print(content: &str, language: &str, title: Option<String>) -> Result<()> {
    let mut input = bat::Input::from_bytes(content.as_bytes());
    let framed = title.is_some();
    if let Some(title) = title {
        input = input.name(title);
    }
    bat::PrettyPrinter::new()
        .input(input)
        .theme(THEME)
        .language(language)
        .grid(framed)
        .header(framed)
        .wrapping_mode(WrappingMode::Character)
        .print()?;
    Ok(())
}

fn print_tool_call(call: &ToolCall) -> Result<()> {
    let arguments = serde_json::to_string_pretty(&call.arguments)?;
    print(&arguments, "JSON", Some(format!("Tool Request: {}", call.name)))
}

fn print_tool_result(result: &ToolResult) -> Result<()> {
    let (content, language) = match &result.result {
        ToolValue::Json(value) => (serde_json::to_string_pretty(value)?, "JSON"),
        other => (other.to_text(), "Markdown"),
    };
    print(&content, language, Some(format!("Tool Response: {}", result.name)))
}

/// Prints every block of a message: markdown text, framed tool calls and results.
pub fn render_message(message: &Message) -> Result<()> {
    for block in &message.contents {
        match block {
            ContentBlock::Text(text) => print(text.text_or_refusal(), "Markdown", None)?,
            ContentBlock::ToolCall(call) => print_tool_call(call)?,
            ContentBlock::ToolResult(result) => print_tool_result(result)?,
            ContentBlock::Image(image) => println!(
                "Image: [{} bytes, type: {}]",
                image.data.len(),
                image.media_type.as_str()
            ),
        }
    }
    println!();
    Ok(())
}

pub fn render_usage(usage: &TokenUsage) {
    println!(
        "{}",
        style(format!(
            "tokens: {} in, {} out",
            usage.input_tokens, usage.output_tokens
        ))
        .dim()
    );
}
