pub mod buffer;
pub mod errors;
pub mod models;
pub mod providers;
pub mod token_counter;
pub mod tool_executor;
