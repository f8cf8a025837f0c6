use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use strum_macros::{Display, EnumIter, EnumString};
use tokio_util::sync::CancellationToken;

use crate::errors::ChatResult;
use crate::models::request::ModelRequest;
use crate::models::response::ModelResponse;

/// The service a model is reached through. Each one speaks its own wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Vendor {
    OpenAi,
    Azure,
    Anthropic,
    Bedrock,
    DashScope,
    Ollama,
    PoohMucho,
}

/// Translation between the canonical model and one vendor's wire format.
///
/// `load` and `dump` are pure: no I/O, no shared mutable state. Network calls live in
/// the [`ChatModel`] that owns the adapter.
pub trait Adapter: Send + Sync {
    type WireRequest: Serialize + Send;
    type WireResponse: DeserializeOwned + Send;

    fn vendor(&self) -> Vendor;

    fn load(&self, request: &ModelRequest) -> ChatResult<Self::WireRequest>;

    fn dump(
        &self,
        request: &ModelRequest,
        response: Self::WireResponse,
    ) -> ChatResult<ModelResponse>;
}

/// A configured model that completes canonical requests.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn vendor(&self) -> Vendor;

    fn model_id(&self) -> &str;

    /// Run one request/response cycle. Cancelling `cancel` aborts the in-flight call.
    async fn complete(
        &self,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse>;
}
