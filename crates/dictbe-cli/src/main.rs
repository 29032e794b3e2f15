use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dictbe_core::{ChatClient, ChatRequest, Message, build_client};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod prompt;

use config::{DictConfig, LlmOverrides};

#[derive(Parser)]
#[command(name = "dict-be")]
#[command(version)]
#[command(about = "dict-be - dictionary and translation on top of chat models")]
struct Cli {
    /// Path to config file (default: ~/.dict-be.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a query between languages
    Query(QueryArgs),

    /// Interact with the configured LLM provider
    Llm {
        #[command(subcommand)]
        command: LlmCommands,
    },

    /// Show current configuration
    Config,

    /// Print build version
    Version,
}

#[derive(Subcommand)]
enum LlmCommands {
    /// Send a chat completion request
    Chat(ChatArgs),

    /// Test LLM connectivity with config or flags
    Test(ConnectionArgs),
}

#[derive(Args)]
struct StreamArgs {
    /// Stream response
    #[arg(long, conflicts_with = "no_stream")]
    stream: bool,

    /// Disable streaming response
    #[arg(long)]
    no_stream: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Text to translate
    text: Vec<String>,

    /// Query file, use -F- for stdin
    #[arg(short = 'F', long = "file", conflicts_with = "text")]
    file: Option<String>,

    /// Input language
    #[arg(long = "input-language", visible_alias = "in", default_value = prompt::AUTO)]
    input_language: String,

    /// Output language
    #[arg(long = "output-language", visible_alias = "out", default_value = prompt::AUTO)]
    output_language: String,

    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Override model name
    #[arg(long)]
    model: Option<String>,

    /// Override base url
    #[arg(long)]
    url: Option<String>,

    /// Override access token
    #[arg(long)]
    token: Option<String>,

    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
struct ChatArgs {
    /// Prompt content (read stdin if empty)
    #[arg(long)]
    prompt: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    #[command(flatten)]
    connection: ConnectionArgs,
}

impl ConnectionArgs {
    fn overrides(&self) -> LlmOverrides {
        LlmOverrides {
            model: self.model.clone(),
            url: self.url.clone(),
            token: self.token.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries model output only
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Query(args) => cmd_query(config_path, args).await,
        Commands::Llm {
            command: LlmCommands::Chat(args),
        } => cmd_llm_chat(config_path, args).await,
        Commands::Llm {
            command: LlmCommands::Test(args),
        } => cmd_llm_test(config_path, args).await,
        Commands::Config => cmd_config(config_path),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn cmd_query(config_path: Option<&Path>, args: QueryArgs) -> Result<()> {
    let input = prompt::read_input(&args.text, args.file.as_deref(), std::io::stdin())?;
    if input.trim().is_empty() {
        bail!("input is required");
    }
    let (input_language, output_language) =
        prompt::resolve_languages(&input, &args.input_language, &args.output_language);
    debug!("Query languages: {} -> {}", input_language, output_language);
    let prompts = prompt::build_query_prompts(&input, &input_language, &output_language);

    let cfg = DictConfig::load(config_path)?;
    let client = build_client(cfg.llm.client_config(&LlmOverrides::default())?)?;
    let request = ChatRequest::new(build_messages(&prompts.system, prompts.user));

    run_with_interrupt(client.as_ref(), &request, args.stream.stream).await
}

async fn cmd_llm_chat(config_path: Option<&Path>, args: ChatArgs) -> Result<()> {
    let cfg = DictConfig::load(config_path)?;

    let mut prompt = args.prompt.unwrap_or_default().trim().to_string();
    if prompt.is_empty() {
        let mut data = String::new();
        std::io::stdin()
            .read_to_string(&mut data)
            .context("read prompt")?;
        prompt = data.trim().to_string();
    }
    if prompt.is_empty() {
        bail!("prompt is required");
    }

    let client = build_client(cfg.llm.client_config(&args.connection.overrides())?)?;
    let system = args.system.unwrap_or_default();
    let request = ChatRequest::new(build_messages(&system, prompt));

    run_with_interrupt(client.as_ref(), &request, args.connection.stream.stream).await
}

async fn cmd_llm_test(config_path: Option<&Path>, args: ConnectionArgs) -> Result<()> {
    let cfg = DictConfig::load(config_path)?;
    let client = build_client(cfg.llm.client_config(&args.overrides())?)?;
    info!(
        "Testing {} connectivity with model {}",
        client.provider_name(),
        client.model()
    );
    let request = ChatRequest::new(vec![Message::user("ping")]);

    run_with_interrupt(client.as_ref(), &request, args.stream.stream).await
}

fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let cfg = DictConfig::load(config_path)?;
    println!("# {}", config::resolve_path(config_path).display());
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

/// `[system?, user]`; the system message is sent only when it has non-blank text
fn build_messages(system: &str, user: String) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if !system.trim().is_empty() {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(user));
    messages
}

/// Run one call against stdout, cancelling it on Ctrl+C
async fn run_with_interrupt(client: &dyn ChatClient, request: &ChatRequest, stream: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling request...");
            watcher.cancel();
        }
    });

    let result = run_chat(client, request, stream, &mut std::io::stdout(), &cancel).await;
    interrupt.abort();
    result
}

/// Print the reply to `out`: deltas as they arrive when streaming, then a newline
async fn run_chat<W: Write + Send>(
    client: &dyn ChatClient,
    request: &ChatRequest,
    stream: bool,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<()> {
    if stream {
        let mut handler = |delta: &str| -> Result<()> {
            out.write_all(delta.as_bytes())?;
            out.flush()?;
            Ok(())
        };
        let response = client.chat_stream(request, &mut handler, cancel).await?;
        writeln!(out)?;
        debug!(
            "Stream finished: model={}, finish_reason={}",
            response.model, response.finish_reason
        );
    } else {
        let response = client.chat(request, cancel).await?;
        writeln!(out, "{}", response.content)?;
        debug!(
            "Chat finished: model={}, finish_reason={}",
            response.model, response.finish_reason
        );
    }
    Ok(())
}
