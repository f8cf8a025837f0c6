mod render;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use chatwire::models::content::ContentBlock;
use chatwire::models::message::Message;
use chatwire::models::request::ModelRequest;
use chatwire::providers::base::{ChatModel, Vendor};
use chatwire::providers::configs::ModelOptions;
use chatwire::providers::factory::new_model;
use chatwire::tool_executor::{ExecutionStatus, Roundtrip, ToolExecutor};
use clap::Parser;
use cliclack::{input, spinner};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::render::{render_message, render_usage};
use crate::tools::demo_tools;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Vendor serving the model (openai, azure, anthropic, bedrock, dashscope, ollama)
    #[arg(short, long, default_value = "openai", value_parser = parse_vendor)]
    vendor: Vendor,

    /// Model to use
    #[arg(short, long, default_value = "gpt-4o")]
    model: String,

    /// API key (defaults to the vendor's environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Endpoint override
    #[arg(long)]
    endpoint: Option<String>,

    /// AWS region for Bedrock
    #[arg(long)]
    region: Option<String>,

    /// HTTP proxy URL
    #[arg(long)]
    proxy: Option<String>,

    /// Maximum model round trips per reply
    #[arg(long, default_value_t = 10)]
    max_roundtrips: usize,

    /// System prompt for the session
    #[arg(long, default_value = "You are a helpful assistant.")]
    system: String,
}

fn parse_vendor(value: &str) -> Result<Vendor, String> {
    value
        .parse::<Vendor>()
        .map_err(|_| format!("unknown vendor '{}'", value))
}

/// Command-line settings, with the vendor's environment variables filling the gaps.
fn build_options(cli: &Cli) -> Result<ModelOptions> {
    let mut options = ModelOptions::new();
    options.api_key = cli.api_key.clone();
    options.endpoint = cli.endpoint.clone();
    options.region = cli.region.clone();
    options.proxy = cli.proxy.clone();
    options
        .with_env(cli.vendor)
        .with_context(|| format!("failed to configure {}", cli.vendor))
}

/// Cancels the token on Ctrl+C until the returned guard is dropped.
struct InterruptGuard(tokio::task::JoinHandle<()>);

impl InterruptGuard {
    fn new(cancel: &CancellationToken) -> Self {
        let cancel = cancel.clone();
        Self(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }))
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one user turn through the tool executor, rendering each round as it arrives.
///
/// Returns the conversation including the final answer, or `None` if the turn failed.
async fn reply(
    model: Arc<dyn ChatModel>,
    history: Vec<Message>,
    max_roundtrips: usize,
) -> Result<Option<Vec<Message>>> {
    let request = ModelRequest::new(history).with_tools(demo_tools());
    let mut executor = ToolExecutor::new(model, request);
    executor.set_max_roundtrips(max_roundtrips)?;

    let cancel = CancellationToken::new();
    let _interrupt = InterruptGuard::new(&cancel);

    loop {
        let spin = spinner();
        spin.start("awaiting reply");
        let status = match executor.execute(&cancel).await {
            Ok(status) => {
                spin.stop("");
                status
            }
            Err(e) => {
                spin.error(e.to_string());
                return Ok(None);
            }
        };

        let count = executor.roundtrip_count();
        if let Some(results) = count
            .checked_sub(2)
            .and_then(|index| executor.roundtrip(index))
            .and_then(Roundtrip::tool_call_results)
        {
            render_message(&Message {
                contents: results.iter().cloned().map(ContentBlock::ToolResult).collect(),
                ..Message::tool()
            })?;
        }

        let Some(last) = executor.last_roundtrip() else {
            return Ok(None);
        };
        let Some(response) = last.response() else {
            return Ok(None);
        };
        for message in &response.messages {
            render_message(message)?;
        }
        render_usage(&response.usage);

        if status == ExecutionStatus::Finished {
            let mut conversation = last.request().messages.clone();
            conversation.extend(response.messages.iter().cloned());
            return Ok(Some(conversation));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let options = build_options(&cli)?;
    let model: Arc<dyn ChatModel> = Arc::from(
        new_model(&cli.model, &options)
            .with_context(|| format!("failed to configure {} on {}", cli.model, cli.vendor))?,
    );

    println!(
        "chatwire {} on {} {}",
        style(&cli.model).cyan(),
        style(cli.vendor).cyan(),
        style("- type \"exit\" to end the session").dim()
    );
    println!();

    let mut history = vec![Message::system().with_text(&cli.system)];
    loop {
        let message_text: String = input("Message:").placeholder("").multiline().interact()?;
        let message_text = message_text.trim();
        if message_text.eq_ignore_ascii_case("exit") {
            break;
        }
        if message_text.is_empty() {
            continue;
        }

        let mut turn = history.clone();
        turn.push(Message::user().with_text(message_text));
        if let Some(conversation) = reply(Arc::clone(&model), turn, cli.max_roundtrips).await? {
            history = conversation;
        }
        println!();
    }
    Ok(())
}
