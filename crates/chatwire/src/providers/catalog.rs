//! Well-known model ids, grouped by the vendor that serves them.

pub const GPT_4O: &str = "gpt-4o";
pub const GPT_4O_MINI: &str = "gpt-4o-mini";
pub const GPT_4_TURBO: &str = "gpt-4-turbo";

pub const CLAUDE_3_5_SONNET: &str = "claude-3-5-sonnet-latest";
pub const CLAUDE_3_5_HAIKU: &str = "claude-3-5-haiku-latest";
pub const CLAUDE_3_OPUS: &str = "claude-3-opus-latest";

pub const BEDROCK_CLAUDE_3_5_SONNET: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";
pub const BEDROCK_CLAUDE_3_HAIKU: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const BEDROCK_LLAMA3_8B: &str = "meta.llama3-8b-instruct-v1:0";
pub const BEDROCK_LLAMA3_70B: &str = "meta.llama3-70b-instruct-v1:0";
pub const BEDROCK_LLAMA3_1_405B: &str = "meta.llama3-1-405b-instruct-v1:0";

pub const QWEN_MAX: &str = "qwen-max";
pub const QWEN_PLUS: &str = "qwen-plus";
pub const QWEN_TURBO: &str = "qwen-turbo";

pub const OLLAMA_LLAMA3_1: &str = "llama3.1";
pub const OLLAMA_QWEN2_5: &str = "qwen2.5";
pub const OLLAMA_MISTRAL: &str = "mistral";
