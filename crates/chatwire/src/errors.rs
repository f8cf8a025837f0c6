use thiserror::Error;

use crate::providers::base::Vendor;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("[{vendor}] failed to translate request: {message}")]
    Translation { vendor: Vendor, message: String },

    #[error("[{vendor}] transport failed{}: {message}", status_suffix(.status))]
    Transport {
        vendor: Vendor,
        status: Option<u16>,
        message: String,
    },

    #[error("[{vendor}] failed to decode response: {message}")]
    Protocol { vendor: Vendor, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool not found: '{tool}' (call {call_id}) has no implementation and no dispatcher is set")]
    ToolNotFound { call_id: String, tool: String },

    #[error("Round-trip limit of {0} reached while the model still requests tools")]
    RoundtripLimit(usize),

    #[error("Tool execution already completed")]
    AlreadyCompleted,

    #[error("[{vendor}] request cancelled")]
    Cancelled { vendor: Vendor },
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" with status {}", code))
        .unwrap_or_default()
}

impl ChatError {
    pub fn translation<S: Into<String>>(vendor: Vendor, message: S) -> Self {
        ChatError::Translation {
            vendor,
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(vendor: Vendor, message: S) -> Self {
        ChatError::Protocol {
            vendor,
            message: message.into(),
        }
    }

    pub fn transport<S: Into<String>>(vendor: Vendor, status: Option<u16>, message: S) -> Self {
        ChatError::Transport {
            vendor,
            status,
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        ChatError::Configuration(message.into())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_vendor_and_phase() {
        let err = ChatError::translation(Vendor::Anthropic, "empty content");
        assert_eq!(
            err.to_string(),
            "[anthropic] failed to translate request: empty content"
        );

        let err = ChatError::transport(Vendor::OpenAi, Some(429), "slow down");
        assert_eq!(
            err.to_string(),
            "[openai] transport failed with status 429: slow down"
        );

        let err = ChatError::transport(Vendor::Ollama, None, "connection refused");
        assert_eq!(
            err.to_string(),
            "[ollama] transport failed: connection refused"
        );
    }
}
