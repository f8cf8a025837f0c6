use std::env;
use std::fmt;
use std::sync::Arc;

use super::base::Vendor;
use super::http::HttpClient;
use super::poohmucho::SecureChannel;
use crate::errors::{ChatError, ChatResult};

/// Receives the exact wire bytes of a request or response. Must tolerate concurrent calls.
pub type PayloadLogger = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Connection settings for a model. Which fields matter depends on the vendor.
#[derive(Clone, Default)]
pub struct ModelOptions {
    pub vendor: Option<Vendor>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub proxy: Option<String>,
    /// Attempts per request, counting the first. Zero behaves as one.
    pub retries: u32,
    pub request_log: Option<PayloadLogger>,
    pub response_log: Option<PayloadLogger>,
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub secure_channel: Option<Arc<dyn SecureChannel>>,
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = Some(vendor);
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_version<S: Into<String>>(mut self, api_version: S) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_proxy<S: Into<String>>(mut self, proxy: S) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_request_log<F>(mut self, log: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.request_log = Some(Arc::new(log));
        self
    }

    pub fn with_response_log<F>(mut self, log: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.response_log = Some(Arc::new(log));
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_secure_channel(mut self, channel: Arc<dyn SecureChannel>) -> Self {
        self.secure_channel = Some(channel);
        self
    }

    /// Reads the vendor's credentials and endpoint from the environment.
    pub fn from_env(vendor: Vendor) -> ChatResult<Self> {
        ModelOptions::new().with_env(vendor)
    }

    /// Fills every setting still unset from the vendor's environment variables.
    ///
    /// Values already present win over the environment and satisfy its required variables.
    pub fn with_env(mut self, vendor: Vendor) -> ChatResult<Self> {
        self.vendor = Some(vendor);
        fill_env(&mut self.proxy, "CHATWIRE_PROXY", false, None)?;
        if let Some(retries) = get_env("CHATWIRE_RETRIES", false, None)? {
            if self.retries == 0 {
                self.retries = retries.parse().map_err(|_| {
                    ChatError::configuration(format!(
                        "CHATWIRE_RETRIES is not a number: {}",
                        retries
                    ))
                })?;
            }
        }

        match vendor {
            Vendor::OpenAi => {
                fill_env(&mut self.api_key, "OPENAI_API_KEY", true, None)?;
                fill_env(&mut self.endpoint, "OPENAI_ENDPOINT", false, None)?;
            }
            Vendor::Azure => {
                fill_env(&mut self.api_key, "AZURE_OPENAI_API_KEY", true, None)?;
                fill_env(&mut self.endpoint, "AZURE_OPENAI_ENDPOINT", true, None)?;
                fill_env(&mut self.api_version, "AZURE_OPENAI_API_VERSION", false, None)?;
            }
            Vendor::Anthropic => {
                fill_env(&mut self.api_key, "ANTHROPIC_API_KEY", true, None)?;
            }
            Vendor::Bedrock => {
                fill_env(&mut self.api_key, "AWS_BEARER_TOKEN_BEDROCK", true, None)?;
                fill_env(&mut self.region, "AWS_REGION", false, Some("us-east-1"))?;
            }
            Vendor::DashScope => {
                fill_env(&mut self.api_key, "DASHSCOPE_API_KEY", true, None)?;
            }
            Vendor::Ollama => {
                fill_env(&mut self.endpoint, "OLLAMA_HOST", false, None)?;
            }
            Vendor::PoohMucho => {}
        }
        Ok(self)
    }

    /// The api key, or a configuration error naming the vendor that needs it.
    pub(crate) fn require_api_key(&self, vendor: Vendor) -> ChatResult<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ChatError::configuration(format!("{} requires an api key", vendor)))
    }
}

impl fmt::Debug for ModelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelOptions")
            .field("vendor", &self.vendor)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_version", &self.api_version)
            .field("proxy", &self.proxy)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

fn fill_env(
    slot: &mut Option<String>,
    key: &str,
    required: bool,
    default: Option<&str>,
) -> ChatResult<()> {
    if slot.as_deref().map_or(true, str::is_empty) {
        *slot = get_env(key, required, default)?;
    }
    Ok(())
}

fn get_env(key: &str, required: bool, default: Option<&str>) -> ChatResult<Option<String>> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        _ => match (default, required) {
            (Some(default), _) => Ok(Some(default.to_string())),
            (None, true) => Err(ChatError::configuration(format!(
                "environment variable {} is required",
                key
            ))),
            (None, false) => Ok(None),
        },
    }
}
