use anyhow::{Context, Result};
use chatwire::models::schema::JsonSchema;
use chatwire::models::tool::{Tool, ToolParameters};
use chatwire::models::value::ToolValue;
use chrono::Local;
use serde_json::{json, Map, Value};

/// The tools offered to the model in every session.
pub fn demo_tools() -> Vec<Tool> {
    vec![count_words_tool(), current_time_tool()]
}

fn count_words_tool() -> Tool {
    Tool::new(
        "count_words",
        "Count the number of words in text",
        ToolParameters::new()
            .with_property(
                "text",
                JsonSchema::string().with_description("The text to count words in"),
            )
            .with_required("text"),
    )
    .with_function(count_words)
}

fn current_time_tool() -> Tool {
    Tool::new(
        "current_time",
        "Get the current local date and time",
        ToolParameters::new(),
    )
    .with_function(|_: Map<String, Value>| -> Result<ToolValue> {
        Ok(ToolValue::from(Local::now().fixed_offset()))
    })
}

fn count_words(arguments: Map<String, Value>) -> Result<ToolValue> {
    let text = arguments
        .get("text")
        .and_then(Value::as_str)
        .context("missing string argument 'text'")?;
    Ok(ToolValue::Json(json!({ "count": text.split_whitespace().count() })))
}
