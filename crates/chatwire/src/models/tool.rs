use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema::{JsonSchema, Properties};
use super::value::ToolValue;

/// A local implementation the tool executor can invoke directly.
#[async_trait]
pub trait ToolFunction: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolValue>;
}

#[async_trait]
impl<F> ToolFunction for F
where
    F: Fn(Map<String, Value>) -> Result<ToolValue> + Send + Sync,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolValue> {
        self(arguments)
    }
}

/// Fallback for tool calls whose declared tool has no local implementation.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        call_id: &str,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolValue>;
}

#[async_trait]
impl<F> ToolDispatcher for F
where
    F: Fn(&str, &str, Map<String, Value>) -> Result<ToolValue> + Send + Sync,
{
    async fn dispatch(
        &self,
        call_id: &str,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolValue> {
        self(call_id, name, arguments)
    }
}

/// The parameters of a tool: always an object with named properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolParameters {
    pub properties: Properties,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property<S: Into<String>>(mut self, name: S, schema: JsonSchema) -> Self {
        self.properties.insert(name, schema);
        self
    }

    pub fn with_required<S: Into<String>>(mut self, name: S) -> Self {
        self.required.push(name.into());
        self
    }
}

/// A tool that can be used by a model.
#[derive(Clone, Serialize)]
pub struct Tool {
    /// The name of the tool, unique within a request
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    pub parameters: ToolParameters,
    /// Whether the model must follow the parameter schema exactly
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strict: bool,
    #[serde(skip)]
    pub function: Option<Arc<dyn ToolFunction>>,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D, parameters: ToolParameters) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: false,
            function: None,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_function<F: ToolFunction + 'static>(mut self, function: F) -> Self {
        self.function = Some(Arc::new(function));
        self
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("strict", &self.strict)
            .field("function", &self.function.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool
    Auto,
    /// The model must call at least one tool
    Required,
    /// The model must call this tool
    Named(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_tool_function() {
        let tool = Tool::new("echo", "Echo the input", ToolParameters::new()).with_function(
            |args: Map<String, Value>| -> Result<ToolValue> {
                Ok(args.get("text").cloned().unwrap_or_default().into())
            },
        );

        let mut args = Map::new();
        args.insert("text".to_string(), json!("hi"));
        let result = tool.function.unwrap().call(args).await.unwrap();
        assert_eq!(result, ToolValue::Text("hi".to_string()));
    }

    #[test]
    fn test_tool_choice_serialization() {
        assert_eq!(
            serde_json::to_value(ToolChoice::Auto).unwrap(),
            json!({"type": "auto"})
        );
        assert_eq!(
            serde_json::to_value(ToolChoice::Named("add".into())).unwrap(),
            json!({"type": "named", "name": "add"})
        );
    }

    #[test]
    fn test_tool_serialization_skips_function() {
        let tool = Tool::new(
            "get_weather",
            "Get the weather for a location",
            ToolParameters::new()
                .with_property("location", JsonSchema::string())
                .with_required("location"),
        )
        .with_function(|_: Map<String, Value>| -> Result<ToolValue> { Ok(ToolValue::Null) });

        assert_eq!(
            serde_json::to_value(&tool).unwrap(),
            json!({
                "name": "get_weather",
                "description": "Get the weather for a location",
                "parameters": {
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                }
            })
        );
    }
}
