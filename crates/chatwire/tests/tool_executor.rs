use std::sync::Arc;

use anyhow::Result;
use chatwire::errors::ChatError;
use chatwire::models::message::Message;
use chatwire::models::request::ModelRequest;
use chatwire::models::response::FinishReason;
use chatwire::models::role::Role;
use chatwire::models::schema::JsonSchema;
use chatwire::models::tool::{Tool, ToolParameters};
use chatwire::models::value::ToolValue;
use chatwire::providers::base::Vendor;
use chatwire::providers::configs::ModelOptions;
use chatwire::providers::factory::new_model;
use chatwire::tool_executor::{ExecutionStatus, ToolExecutor};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn temperature_tool() -> Tool {
    Tool::new(
        "current_temperature",
        "Current temperature in a city, in celsius",
        ToolParameters::new()
            .with_property("city", JsonSchema::string())
            .with_required("city"),
    )
    .with_function(|arguments: Map<String, Value>| -> Result<ToolValue> {
        match arguments.get("city").and_then(Value::as_str) {
            Some("Oslo") => Ok(ToolValue::Float(-3.5)),
            Some(city) => Ok(ToolValue::Text(format!("no station in {}", city))),
            None => Err(anyhow::anyhow!("city is required")),
        }
    })
}

fn tool_call_body(calls: Value) -> Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": null, "tool_calls": calls},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 12}
    })
}

fn text_body(text: &str) -> Value {
    json!({
        "id": "chatcmpl-2",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 60, "completion_tokens": 8}
    })
}

fn call(id: &str, city: &str) -> Value {
    json!({
        "id": id,
        "type": "function",
        "function": {
            "name": "current_temperature",
            "arguments": json!({"city": city}).to_string()
        }
    })
}

async fn mount_sequence(server: &MockServer, bodies: Vec<Value>) {
    for body in bodies {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
}

fn options(server: &MockServer) -> ModelOptions {
    ModelOptions::new()
        .with_vendor(Vendor::OpenAi)
        .with_api_key("test-key")
        .with_endpoint(format!("{}/v1/chat/completions", server.uri()))
}

async fn sent_bodies(server: &MockServer) -> Result<Vec<Value>> {
    let requests = server.received_requests().await.unwrap_or_default();
    requests
        .iter()
        .map(|request| Ok(serde_json::from_slice(&request.body)?))
        .collect()
}

#[tokio::test]
async fn test_tool_round_trip_over_http() -> Result<()> {
    let server = MockServer::start().await;
    mount_sequence(
        &server,
        vec![
            tool_call_body(json!([call("call_a", "Oslo"), call("call_b", "Lima")])),
            text_body("Oslo is at -3.5°C; Lima has no station."),
        ],
    )
    .await;

    let model = new_model("gpt-4o-mini", &options(&server))?;
    let request = ModelRequest::new(vec![
        Message::system().with_text("You report temperatures."),
        Message::user().with_text("How cold is it in Oslo and Lima?"),
    ])
    .with_tools(vec![temperature_tool()]);

    let mut executor = ToolExecutor::new(Arc::from(model), request);
    let response = executor.run_to_completion(&CancellationToken::new()).await?;
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.text(), "Oslo is at -3.5°C; Lima has no station.");
    assert_eq!(executor.roundtrip_count(), 2);

    let bodies = sent_bodies(&server).await?;
    assert_eq!(bodies.len(), 2);
    let messages = bodies[1]["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[2]["role"], "assistant");
    assert_eq!(messages[2]["tool_calls"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        messages[3],
        json!({"role": "tool", "tool_call_id": "call_a", "content": "-3.5"})
    );
    assert_eq!(
        messages[4],
        json!({"role": "tool", "tool_call_id": "call_b", "content": "no station in Lima"})
    );

    let first = executor.roundtrip(0).expect("first round");
    let results = first.tool_call_results().expect("tool results");
    assert_eq!(results[0].result, ToolValue::Float(-3.5));
    assert_eq!(first.request().messages.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_budget_exhausted_by_looping_model() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_body(json!([call(
            "call_loop", "Oslo"
        )]))))
        .mount(&server)
        .await;

    let model = new_model("gpt-4o", &options(&server))?;
    let request = ModelRequest::new(vec![Message::user().with_text("Keep checking Oslo.")])
        .with_tools(vec![temperature_tool()]);
    let mut executor = ToolExecutor::new(Arc::from(model), request);
    executor.set_max_roundtrips(3)?;
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        assert_eq!(executor.execute(&cancel).await?, ExecutionStatus::ToolCallsPending);
    }
    let err = executor.execute(&cancel).await.unwrap_err();
    assert!(matches!(err, ChatError::RoundtripLimit(3)));
    assert_eq!(sent_bodies(&server).await?.len(), 3);

    let last = executor.last_roundtrip().expect("last round");
    assert_eq!(
        last.request()
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .count(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_round_can_be_resent() -> Result<()> {
    let server = MockServer::start().await;
    mount_sequence(&server, vec![text_body("Hello again")]).await;

    let model = new_model("gpt-4o", &options(&server))?;
    let request = ModelRequest::new(vec![Message::user().with_text("Hello")]);
    let mut executor = ToolExecutor::new(Arc::from(model), request);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        executor.execute(&cancelled).await,
        Err(ChatError::Cancelled { .. })
    ));
    assert!(executor.last_roundtrip().and_then(|r| r.response()).is_none());

    let status = executor.execute(&CancellationToken::new()).await?;
    assert_eq!(status, ExecutionStatus::Finished);
    assert_eq!(executor.roundtrip_count(), 1);
    assert!(matches!(
        executor.execute(&CancellationToken::new()).await,
        Err(ChatError::AlreadyCompleted)
    ));
    Ok(())
}
