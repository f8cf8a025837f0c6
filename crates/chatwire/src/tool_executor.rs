//! Drives the tool-use loop: send a request, run the tools the model asks for, feed the
//! results back, and repeat until the model answers or the round-trip budget runs out.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{ChatError, ChatResult};
use crate::models::content::{ContentBlock, ToolCall, ToolResult};
use crate::models::message::Message;
use crate::models::request::ModelRequest;
use crate::models::response::{FinishReason, ModelResponse};
use crate::models::tool::{ToolDispatcher, ToolFunction};
use crate::providers::base::{ChatModel, Vendor};

pub const DEFAULT_MAX_ROUNDTRIPS: usize = 10;
pub const MAX_ROUNDTRIPS_CEILING: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The model produced a final answer.
    Finished,
    /// The model asked for tools; call `execute` again to run them and continue.
    ToolCallsPending,
}

/// One request, the response it got, and the results of the tools that response asked for.
#[derive(Debug, Clone)]
pub struct Roundtrip {
    request: ModelRequest,
    response: Option<ModelResponse>,
    tool_call_results: Option<Vec<ToolResult>>,
}

impl Roundtrip {
    fn new(request: ModelRequest) -> Self {
        Self {
            request,
            response: None,
            tool_call_results: None,
        }
    }

    pub fn request(&self) -> &ModelRequest {
        &self.request
    }

    /// `None` when sending the request failed.
    pub fn response(&self) -> Option<&ModelResponse> {
        self.response.as_ref()
    }

    pub fn tool_call_results(&self) -> Option<&[ToolResult]> {
        self.tool_call_results.as_deref()
    }
}

enum ToolHandler {
    Function(Arc<dyn ToolFunction>),
    Dispatcher(Arc<dyn ToolDispatcher>),
}

pub struct ToolExecutor {
    model: Arc<dyn ChatModel>,
    initial_request: ModelRequest,
    dispatcher: Option<Arc<dyn ToolDispatcher>>,
    max_roundtrips: usize,
    roundtrips: Vec<Roundtrip>,
}

impl ToolExecutor {
    pub fn new(model: Arc<dyn ChatModel>, request: ModelRequest) -> Self {
        Self {
            model,
            initial_request: request,
            dispatcher: None,
            max_roundtrips: DEFAULT_MAX_ROUNDTRIPS,
            roundtrips: Vec::new(),
        }
    }

    /// Handles tool calls whose declared tool has no local function.
    pub fn with_dispatcher<D: ToolDispatcher + 'static>(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn set_max_roundtrips(&mut self, max_roundtrips: usize) -> ChatResult<()> {
        if max_roundtrips == 0 || max_roundtrips > MAX_ROUNDTRIPS_CEILING {
            return Err(ChatError::configuration(format!(
                "max roundtrips must be between 1 and {}, got {}",
                MAX_ROUNDTRIPS_CEILING, max_roundtrips
            )));
        }
        self.max_roundtrips = max_roundtrips;
        Ok(())
    }

    pub fn max_roundtrips(&self) -> usize {
        self.max_roundtrips
    }

    pub fn roundtrip_count(&self) -> usize {
        self.roundtrips.len()
    }

    pub fn roundtrip(&self, index: usize) -> Option<&Roundtrip> {
        self.roundtrips.get(index)
    }

    pub fn last_roundtrip(&self) -> Option<&Roundtrip> {
        self.roundtrips.last()
    }

    /// Advances the conversation by one round trip.
    ///
    /// The first call sends the initial request. Each later call runs the tools the last
    /// response asked for and sends their results. A round whose send failed is resent
    /// as is. Once the model has answered, further calls fail with `AlreadyCompleted`.
    pub async fn execute(&mut self, cancel: &CancellationToken) -> ChatResult<ExecutionStatus> {
        let vendor = self.model.vendor();
        let count = self.roundtrips.len();
        let max_roundtrips = self.max_roundtrips;

        let request = match self.roundtrips.last_mut() {
            None => self.initial_request.clone(),
            Some(Roundtrip {
                request,
                response: None,
                ..
            }) => {
                debug!(round = count, "resending unanswered round");
                let request = request.clone();
                self.roundtrips.pop();
                request
            }
            Some(Roundtrip {
                response: Some(response),
                ..
            }) if response.finish_reason != FinishReason::ToolCalls => {
                return Err(ChatError::AlreadyCompleted);
            }
            Some(Roundtrip {
                request,
                response: Some(response),
                tool_call_results,
            }) => {
                if count >= max_roundtrips {
                    return Err(ChatError::RoundtripLimit(max_roundtrips));
                }
                let results = match tool_call_results {
                    Some(results) => results.clone(),
                    None => {
                        let computed = run_tool_calls(
                            request,
                            response,
                            self.dispatcher.as_ref(),
                            vendor,
                            cancel,
                        )
                        .await?;
                        *tool_call_results = Some(computed.clone());
                        computed
                    }
                };
                next_request(request, response, results)
            }
        };

        self.send(request, cancel).await
    }

    /// Calls `execute` until the model answers, returning the final response.
    pub async fn run_to_completion(
        &mut self,
        cancel: &CancellationToken,
    ) -> ChatResult<&ModelResponse> {
        while self.execute(cancel).await? == ExecutionStatus::ToolCallsPending {}
        self.roundtrips
            .last()
            .and_then(Roundtrip::response)
            .ok_or(ChatError::AlreadyCompleted)
    }

    async fn send(
        &mut self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ExecutionStatus> {
        let round = self.roundtrips.len() + 1;
        debug!(
            round,
            model = self.model.model_id(),
            messages = request.messages.len(),
            "sending round"
        );
        let result = self.model.complete(&request, cancel).await;

        let mut roundtrip = Roundtrip::new(request);
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.roundtrips.push(roundtrip);
                return Err(e);
            }
        };
        let status = if response.finish_reason == FinishReason::ToolCalls {
            ExecutionStatus::ToolCallsPending
        } else {
            ExecutionStatus::Finished
        };
        info!(
            round,
            tool_calls = response.tool_calls().count(),
            finish_reason = %response.finish_reason,
            "round completed"
        );
        roundtrip.response = Some(response);
        self.roundtrips.push(roundtrip);
        Ok(status)
    }
}

/// The previous request, the model's reply, and one tool message with every result.
fn next_request(
    request: &ModelRequest,
    response: &ModelResponse,
    results: Vec<ToolResult>,
) -> ModelRequest {
    let mut next = request.clone();
    next.messages.extend(response.messages.iter().cloned());
    next.messages.push(Message {
        contents: results.into_iter().map(ContentBlock::ToolResult).collect(),
        ..Message::tool()
    });
    next
}

fn resolve_handler(
    request: &ModelRequest,
    dispatcher: Option<&Arc<dyn ToolDispatcher>>,
    call: &ToolCall,
) -> ChatResult<ToolHandler> {
    if let Some(function) = request
        .find_tool(&call.name)
        .and_then(|tool| tool.function.as_ref())
    {
        return Ok(ToolHandler::Function(Arc::clone(function)));
    }
    match dispatcher {
        Some(dispatcher) => Ok(ToolHandler::Dispatcher(Arc::clone(dispatcher))),
        None => Err(ChatError::ToolNotFound {
            call_id: call.id.clone(),
            tool: call.name.clone(),
        }),
    }
}

async fn invoke(call: &ToolCall, handler: ToolHandler) -> ChatResult<ToolResult> {
    let output = match handler {
        ToolHandler::Function(function) => function.call(call.arguments.clone()).await,
        ToolHandler::Dispatcher(dispatcher) => {
            dispatcher
                .dispatch(&call.id, &call.name, call.arguments.clone())
                .await
        }
    };
    let result = output.map_err(|e| ChatError::ToolExecution {
        tool: call.name.clone(),
        message: format!("{:#}", e),
    })?;
    Ok(ToolResult {
        id: call.id.clone(),
        name: call.name.clone(),
        result,
    })
}

/// Runs every requested call concurrently. Results keep the order of the calls.
///
/// Every call is resolved to a handler before any of them runs, so an unknown tool
/// fails the round without side effects.
async fn run_tool_calls(
    request: &ModelRequest,
    response: &ModelResponse,
    dispatcher: Option<&Arc<dyn ToolDispatcher>>,
    vendor: Vendor,
    cancel: &CancellationToken,
) -> ChatResult<Vec<ToolResult>> {
    let calls: Vec<&ToolCall> = response.tool_calls().collect();
    if calls.is_empty() {
        return Err(ChatError::protocol(
            vendor,
            "finish reason is tool_calls but the response carries no tool calls",
        ));
    }
    let handlers = calls
        .iter()
        .map(|call| resolve_handler(request, dispatcher, call))
        .collect::<ChatResult<Vec<_>>>()?;

    debug!(calls = calls.len(), "running tool calls");
    let pending = calls
        .iter()
        .zip(handlers)
        .map(|(call, handler)| invoke(call, handler));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled { vendor }),
        results = try_join_all(pending) => results,
    }
}
