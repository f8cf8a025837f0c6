use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::{Adapter, Vendor};
use super::configs::{ModelOptions, PayloadLogger};
use super::utils::{decode_json, encode_json};
use crate::buffer::BufferPool;
use crate::errors::{ChatError, ChatResult};
use crate::models::request::ModelRequest;
use crate::models::response::ModelResponse;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const RETRY_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs HTTP exchanges on behalf of the models. Owns pooling, proxying and retries.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// The default [`HttpClient`], backed by reqwest.
pub struct ReqwestClient {
    client: Client,
    retries: u32,
}

impl ReqwestClient {
    pub fn new(proxy: Option<&str>, retries: u32) -> Result<Self> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            retries,
        })
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let attempts = self.retries.max(1);
        let mut attempt = 1;
        loop {
            let result = self.send_once(&request).await;
            let retryable = match &result {
                Ok(response) => response.status >= 500,
                Err(_) => true,
            };
            if !retryable || attempt >= attempts {
                return result;
            }
            attempt += 1;
            warn!(url = %request.url, attempt, attempts, "retrying request");
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }
}

/// The HTTP side of a model: one client, the vendor tag for errors, and payload loggers.
#[derive(Clone)]
pub struct HttpTransport {
    vendor: Vendor,
    client: Arc<dyn HttpClient>,
    request_log: Option<PayloadLogger>,
    response_log: Option<PayloadLogger>,
}

impl HttpTransport {
    pub fn new(vendor: Vendor, options: &ModelOptions) -> ChatResult<Self> {
        let client: Arc<dyn HttpClient> = match &options.http_client {
            Some(client) => Arc::clone(client),
            None => Arc::new(
                ReqwestClient::new(options.proxy.as_deref(), options.retries).map_err(|e| {
                    ChatError::configuration(format!("failed to build HTTP client: {:#}", e))
                })?,
            ),
        };
        Ok(Self {
            vendor,
            client,
            request_log: options.request_log.clone(),
            response_log: options.response_log.clone(),
        })
    }

    /// POST a JSON body and return the body of a successful response.
    pub async fn post_json(
        &self,
        url: &str,
        mut headers: Vec<(String, String)>,
        body: Vec<u8>,
        cancel: &CancellationToken,
    ) -> ChatResult<Vec<u8>> {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        if let Some(log) = &self.request_log {
            log(&body);
        }
        debug!(vendor = %self.vendor, url, bytes = body.len(), "sending request");

        let request = HttpRequest {
            method: Method::POST,
            url: url.to_string(),
            headers,
            body,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled { vendor: self.vendor }),
            result = self.client.send(request) => result,
        };
        let response =
            result.map_err(|e| ChatError::transport(self.vendor, None, format!("{:#}", e)))?;

        if let Some(log) = &self.response_log {
            log(&response.body);
        }
        if !response.is_success() {
            return Err(ChatError::transport(
                self.vendor,
                Some(response.status),
                String::from_utf8_lossy(&response.body).into_owned(),
            ));
        }
        Ok(response.body)
    }

    /// One full cycle through an adapter: load, encode, post, decode, dump.
    pub async fn complete<A: Adapter>(
        &self,
        adapter: &A,
        buffers: &BufferPool,
        url: &str,
        headers: Vec<(String, String)>,
        request: &ModelRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<ModelResponse> {
        let wire = adapter.load(request)?;
        let body = encode_json(buffers, self.vendor, &wire)?;
        let bytes = self.post_json(url, headers, body, cancel).await?;
        let response = adapter.dump(request, decode_json(self.vendor, &bytes)?)?;
        debug!(
            vendor = %self.vendor,
            id = %response.id,
            finish_reason = %response.finish_reason,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "received response"
        );
        Ok(response)
    }
}
