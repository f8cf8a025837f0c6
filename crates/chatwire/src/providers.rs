pub mod anthropic;
pub mod base;
pub mod bedrock;
pub mod catalog;
pub mod configs;
pub mod factory;
pub mod http;
pub mod llama3;
pub mod ollama;
pub mod openai;
pub mod poohmucho;
pub mod utils;

#[cfg(test)]
pub mod mock;
