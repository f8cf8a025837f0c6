use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::anthropic::{ClaudeAdapter, ClaudeFlavor};
use super::base::{Adapter, ChatModel, Vendor};
use super::configs::ModelOptions;
use super::http::HttpTransport;
use super::llama3::Llama3Adapter;
use crate::buffer::BufferPool;
use crate::errors::{ChatError, ChatResult};
use crate::models::request::ModelRequest;
use crate::models::response::ModelResponse;

const MODEL_VERSION_SUFFIX: &str = "-v1:0";

/// The Bedrock runtime invoke API, shared by every model family hosted there.
///
/// Requests authenticate with a Bedrock API key sent as a bearer token.
struct BedrockRuntime {
    base_url: String,
    api_key: String,
    transport: HttpTransport,
    buffers: BufferPool,
}

impl BedrockRuntime {
    fn new(options: &ModelOptions) -> ChatResult<Self> {
        if options.api_version.is_some() {
            return Err(ChatError::configuration("bedrock does not support api_version"));
        }
        let api_key = options.require_api_key(Vendor::Bedrock)?;
        let base_url = match (&options.endpoint, &options.region) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(region)) if !region.is_empty() => {
                format!("https://bedrock-runtime.{}.amazonaws.com", region)
            }
            _ => {
                return Err(ChatError::configuration(
                    "bedrock requires a region or an endpoint",
                ))
            }
        };
        Ok(Self {
            base_url,
            api_key,
            transport: HttpTransport::new(Vendor::Bedrock, options)?,
            buffers: BufferPool::default(),
        })
    }

    fn invoke_url(&self, model_id: &str) -> String {
        format!(
            "{}/model/{}/invoke",
            self.base_url,
            urlencoding::encode(model_id)
        )
    }

    async fn invoke<A: Adapter>(
        &self,
        adapter: &A,
        model_id: &str,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", self.api_key)),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        self.transport
            .complete(
                adapter,
                &self.buffers,
                &self.invoke_url(model_id),
                headers,
                request,
                cancel,
            )
            .await
    }
}

/// Expands a short model name into a Bedrock model id.
///
/// Ids that already carry a provider prefix (`anthropic.`, `us.meta.` ...) pass through.
fn bedrock_model_id(model_id: &str, provider: &str) -> String {
    if model_id.contains('.') {
        return model_id.to_string();
    }
    let mut id = format!("{}.{}", provider, model_id);
    if !id.contains(':') {
        id.push_str(MODEL_VERSION_SUFFIX);
    }
    id
}

/// Claude served through Bedrock.
pub struct BedrockClaudeModel {
    model_id: String,
    bedrock_id: String,
    adapter: ClaudeAdapter,
    runtime: BedrockRuntime,
}

impl BedrockClaudeModel {
    pub fn new<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        let model_id = model_id.into();
        Ok(Self {
            bedrock_id: bedrock_model_id(&model_id, "anthropic"),
            model_id,
            adapter: ClaudeAdapter::new(ClaudeFlavor::Bedrock),
            runtime: BedrockRuntime::new(options)?,
        })
    }
}

#[async_trait]
impl ChatModel for BedrockClaudeModel {
    fn vendor(&self) -> Vendor {
        Vendor::Bedrock
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        self.runtime
            .invoke(&self.adapter, &self.bedrock_id, request, cancel)
            .await
    }
}

/// Llama 3 served through Bedrock, driven by the raw-prompt protocol.
pub struct BedrockLlama3Model {
    model_id: String,
    bedrock_id: String,
    adapter: Llama3Adapter,
    runtime: BedrockRuntime,
}

impl BedrockLlama3Model {
    pub fn new<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        let model_id = model_id.into();
        Ok(Self {
            bedrock_id: bedrock_model_id(&model_id, "meta"),
            model_id,
            adapter: Llama3Adapter,
            runtime: BedrockRuntime::new(options)?,
        })
    }
}

#[async_trait]
impl ChatModel for BedrockLlama3Model {
    fn vendor(&self) -> Vendor {
        Vendor::Bedrock
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        self.runtime
            .invoke(&self.adapter, &self.bedrock_id, request, cancel)
            .await
    }
}
