use super::anthropic::AnthropicModel;
use super::base::{ChatModel, Vendor};
use super::bedrock::{BedrockClaudeModel, BedrockLlama3Model};
use super::configs::ModelOptions;
use super::ollama::OllamaModel;
use super::openai::OpenAiModel;
use super::poohmucho::PoohMuchoModel;
use crate::errors::{ChatError, ChatResult};

/// Picks the model implementation for an id and the configured vendor.
///
/// The model family named in the id decides the protocol; the vendor decides where it
/// is served. Ollama and PoohMucho serve any id.
pub fn new_model(model_id: &str, options: &ModelOptions) -> ChatResult<Box<dyn ChatModel>> {
    let id = model_id.to_lowercase();
    let model: Box<dyn ChatModel> = match options.vendor {
        Some(Vendor::Ollama) => Box::new(OllamaModel::new(model_id, options)?),
        Some(Vendor::PoohMucho) => Box::new(PoohMuchoModel::new(model_id, options)?),
        Some(Vendor::Azure) if id.contains("gpt") => {
            Box::new(OpenAiModel::azure(model_id, options)?)
        }
        Some(Vendor::OpenAi) | None if id.contains("gpt") => {
            Box::new(OpenAiModel::openai(model_id, options)?)
        }
        Some(Vendor::Anthropic) | None if id.contains("claude") => {
            Box::new(AnthropicModel::new(model_id, options)?)
        }
        Some(Vendor::Bedrock) if id.contains("claude") => {
            Box::new(BedrockClaudeModel::new(model_id, options)?)
        }
        Some(Vendor::Bedrock) if id.contains("llama3") => {
            Box::new(BedrockLlama3Model::new(model_id, options)?)
        }
        Some(Vendor::DashScope) if id.contains("qwen") => {
            Box::new(OpenAiModel::dashscope(model_id, options)?)
        }
        vendor => {
            return Err(ChatError::configuration(format!(
                "unsupported model {} for vendor {}",
                model_id,
                vendor.map(|v| v.to_string()).unwrap_or_else(|| "unset".to_string())
            )))
        }
    };
    Ok(model)
}
