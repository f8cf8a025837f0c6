use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::base::{ChatModel, Vendor};
use crate::errors::{ChatError, ChatResult};
use crate::models::message::Message;
use crate::models::request::ModelRequest;
use crate::models::response::{ModelResponse, TokenUsage};

/// A model that replays scripted results and records every request it receives.
pub struct MockModel {
    script: Mutex<VecDeque<ChatResult<ModelResponse>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockModel {
    pub fn new(script: Vec<ChatResult<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn text_response(text: &str) -> ChatResult<ModelResponse> {
        Ok(ModelResponse::new(
            "mock",
            vec![Message::assistant().with_text(text)],
            "stop",
            TokenUsage::new(10, 5),
        ))
    }

    /// A response asking for each `(id, name, arguments)` call.
    pub fn tool_call_response(calls: &[(&str, &str, Value)]) -> ChatResult<ModelResponse> {
        let message = calls
            .iter()
            .fold(Message::assistant(), |message, (id, name, arguments)| {
                message.with_tool_call(
                    *id,
                    *name,
                    arguments.as_object().cloned().unwrap_or_default(),
                )
            });
        Ok(ModelResponse::new(
            "mock",
            vec![message],
            "tool_calls",
            TokenUsage::new(10, 5),
        ))
    }
}

#[async_trait]
impl ChatModel for MockModel {
    fn vendor(&self) -> Vendor {
        Vendor::OpenAi
    }

    fn model_id(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        _cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::protocol(Vendor::OpenAi, "script exhausted")))
    }
}
