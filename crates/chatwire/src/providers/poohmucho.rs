//! PoohMucho, a private vendor reached through an encrypted channel instead of HTTP.
//!
//! Its wire format is the canonical model itself, so the adapter only adds the model id
//! on the way out and checks the error field on the way back.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::base::{Adapter, ChatModel, Vendor};
use super::configs::{ModelOptions, PayloadLogger};
use super::utils::{decode_json, encode_json};
use crate::buffer::BufferPool;
use crate::errors::{ChatError, ChatResult};
use crate::models::message::Message;
use crate::models::request::ModelRequest;
use crate::models::response::{ModelResponse, TokenUsage};

/// An authenticated, encrypted request/response channel to the vendor.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    async fn invoke_model(&self, input: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
pub struct PoohMuchoRequest {
    pub model: String,
    #[serde(flatten)]
    pub request: ModelRequest,
}

#[derive(Debug, Deserialize)]
pub struct PoohMuchoResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub content_filter_result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PoohMuchoAdapter {
    model: String,
}

impl PoohMuchoAdapter {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Adapter for PoohMuchoAdapter {
    type WireRequest = PoohMuchoRequest;
    type WireResponse = PoohMuchoResponse;

    fn vendor(&self) -> Vendor {
        Vendor::PoohMucho
    }

    fn load(&self, request: &ModelRequest) -> ChatResult<PoohMuchoRequest> {
        Ok(PoohMuchoRequest {
            model: self.model.clone(),
            request: request.clone(),
        })
    }

    fn dump(&self, _request: &ModelRequest, response: PoohMuchoResponse) -> ChatResult<ModelResponse> {
        if let Some(message) = response.error_message.filter(|m| !m.is_empty()) {
            return Err(ChatError::protocol(Vendor::PoohMucho, message));
        }
        let mut dumped = ModelResponse::new(
            response.id,
            response.messages,
            response.finish_reason,
            response.usage,
        );
        dumped.content_filter_result = response.content_filter_result;
        Ok(dumped)
    }
}

pub struct PoohMuchoModel {
    model_id: String,
    adapter: PoohMuchoAdapter,
    channel: Arc<dyn SecureChannel>,
    request_log: Option<PayloadLogger>,
    response_log: Option<PayloadLogger>,
    buffers: BufferPool,
}

impl PoohMuchoModel {
    pub fn new<S: Into<String>>(model_id: S, options: &ModelOptions) -> ChatResult<Self> {
        let channel = options.secure_channel.clone().ok_or_else(|| {
            ChatError::configuration("poohmucho requires a secure channel")
        })?;
        let model_id = model_id.into();
        Ok(Self {
            adapter: PoohMuchoAdapter::new(model_id.clone()),
            model_id,
            channel,
            request_log: options.request_log.clone(),
            response_log: options.response_log.clone(),
            buffers: BufferPool::default(),
        })
    }
}

#[async_trait]
impl ChatModel for PoohMuchoModel {
    fn vendor(&self) -> Vendor {
        Vendor::PoohMucho
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        let wire = self.adapter.load(request)?;
        let body = encode_json(&self.buffers, Vendor::PoohMucho, &wire)?;
        if let Some(log) = &self.request_log {
            log(&body);
        }
        debug!(vendor = %Vendor::PoohMucho, bytes = body.len(), "invoking model");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled { vendor: Vendor::PoohMucho }),
            result = self.channel.invoke_model(&body) => result,
        };
        let bytes =
            result.map_err(|e| ChatError::transport(Vendor::PoohMucho, None, format!("{:#}", e)))?;
        if let Some(log) = &self.response_log {
            log(&bytes);
        }

        self.adapter
            .dump(request, decode_json(Vendor::PoohMucho, &bytes)?)
    }
}
