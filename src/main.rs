use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use openlike_core::config::{AppConfig, ClientOptions};
use openlike_core::traits::ChatModel;
use openlike_core::types::{CallOptions, ChatMessage};
use openlike_llm::providers::all_descriptors;
use openlike_llm::{get_instance, infer_provider, ProviderId};

#[derive(Parser)]
#[command(name = "openlike", version, about = "Chat with OpenAI-compatible LLM providers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "openlike.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported providers and their environment variables
    Providers,
    /// Show which provider a model name maps to
    Infer {
        model: String,
    },
    /// Send a single prompt and print the reply
    Chat {
        /// Model name (overrides the config file)
        #[arg(short, long)]
        model: Option<String>,
        /// Provider tag (deepseek-ai, dashscope, ...); inferred when omitted
        #[arg(short, long)]
        provider: Option<String>,
        /// Print the reply as it streams in
        #[arg(long)]
        stream: bool,
        /// Turn the provider's thinking mode on or off
        #[arg(long)]
        thinking: Option<bool>,
        /// Token budget for thinking
        #[arg(long)]
        thinking_budget: Option<u32>,
        /// The prompt; read from stdin when empty
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("openlike=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Providers => {
            for d in all_descriptors() {
                println!(
                    "{:<14} key={:<18} base={:<18} default={}",
                    d.id.as_str(),
                    d.api_key_env,
                    d.api_base_env,
                    d.default_base_url.unwrap_or("-")
                );
            }
        }
        Commands::Infer { model } => {
            println!("{}", infer_provider(&model));
        }
        Commands::Chat {
            model,
            provider,
            stream,
            thinking,
            thinking_budget,
            prompt,
        } => {
            let config = if cli.config.exists() {
                Some(AppConfig::load(&cli.config)?)
            } else {
                None
            };

            let (config_model, config_provider, options) = match config {
                Some(c) => (Some(c.model.model), c.model.provider, c.model.options),
                None => (None, None, ClientOptions::default()),
            };

            let Some(model) = model.or(config_model) else {
                bail!("no model given; pass --model or set [model] in {}", cli.config.display());
            };
            let provider = provider
                .or(config_provider)
                .map(|p| p.parse::<ProviderId>())
                .transpose()?;

            let client = get_instance(&model, provider, thinking, thinking_budget, options)?;
            info!(provider = %client.provider(), model = client.model(), "Sending prompt");

            let text = if prompt.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                prompt.join(" ")
            };
            let messages = vec![ChatMessage::user(text)];
            let call = CallOptions::default();

            if stream {
                let mut chunks = client.stream(messages, &call).await?;
                let mut stdout = io::stdout();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if let Some(reasoning) = chunk.message.reasoning_content() {
                        eprint!("{reasoning}");
                    }
                    print!("{}", chunk.message.content);
                    stdout.flush()?;
                }
                println!();
            } else {
                let result = client.generate(messages, &call).await?;
                let message = result.message().context("provider returned no choices")?;
                if let Some(reasoning) = message.reasoning_content() {
                    eprintln!("{reasoning}\n");
                }
                println!("{}", message.content);
                if let Some(usage) = result.usage {
                    info!(
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "Usage"
                    );
                }
            }
        }
    }

    Ok(())
}
