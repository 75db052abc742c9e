//! jenkins-mcp CLI - Jenkins build lifecycle over MCP, plus a few direct
//! commands for checking a setup by hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use jenkins_mcp_bridge::{BuildOrchestrator, CorrelationRegistry, WebhookIngestor, WebhookNormalizer};
use jenkins_mcp_core::{Config, Settings, WebhookAuth};
use jenkins_mcp_jenkins::JenkinsClient;
use jenkins_mcp_server::{
    check_tool_table, spawn_housekeeping, McpServer, ToolDispatcher, WebhookListener,
};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// How often abandoned waiters and stale idempotency keys are swept.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Keys listed by `config show`, in display order.
const CONFIG_KEYS: &[&str] = &[
    "jenkins.url",
    "jenkins.username",
    "jenkins.api_token",
    "jenkins.request_timeout_ms",
    "orchestration.poll_interval_ms",
    "orchestration.max_wait_ms",
    "orchestration.max_concurrent_triggers",
    "orchestration.console_tail_lines",
    "retry.max_attempts",
    "retry.base_delay_ms",
    "retry.max_delay_ms",
    "webhook.enabled",
    "webhook.listen",
    "webhook.path",
    "webhook.auth",
    "webhook.signature_header",
    "webhook.secret",
];

#[derive(Parser)]
#[command(name = "jenkins-mcp")]
#[command(author, version, about = "Jenkins builds as MCP tools", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format for build commands: markdown, compact or json
    #[arg(long, global = true)]
    format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio
    Serve {
        /// Do not start the webhook listener even if it is enabled
        #[arg(long)]
        no_webhook: bool,
    },

    /// Read or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Trigger a job and wait for it to finish
    Trigger {
        /// Job name, folders separated by '/'
        job: String,

        /// Build parameter as KEY=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        param: Vec<(String, String)>,

        /// Return as soon as the build is queued
        #[arg(long)]
        no_wait: bool,

        /// Reuse an in-flight build triggered with the same key
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Show the state of a build
    Status {
        job: String,
        build_number: u64,

        /// Include the tail of the console log
        #[arg(long)]
        console: bool,
    },

    /// List Jenkins jobs
    Jobs,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration (secrets are masked)
    Show,
    /// Print the config file location
    Path,
    /// Print one value
    Get { key: String },
    /// Set one value, e.g. `config set jenkins.url https://ci.example.com`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the MCP transport.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match cli.command {
        Some(Commands::Serve { no_webhook }) => {
            let config = Config::load_from(&config_path)?;
            serve(&config, no_webhook).await?;
        }
        Some(Commands::Config { command }) => handle_config(command, &config_path)?,
        Some(Commands::Trigger {
            job,
            param,
            no_wait,
            idempotency_key,
        }) => {
            let params: Map<String, Value> = param
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let mut args = json!({ "job": job, "params": params, "wait": !no_wait });
            if let Some(key) = idempotency_key {
                args["idempotency_key"] = Value::String(key);
            }
            run_tool(&config_path, "trigger_build", args, cli.format).await?;
        }
        Some(Commands::Status {
            job,
            build_number,
            console,
        }) => {
            let args = json!({
                "job": job,
                "build_number": build_number,
                "include_console": console,
            });
            run_tool(&config_path, "get_build_status", args, cli.format).await?;
        }
        Some(Commands::Jobs) => run_tool(&config_path, "list_jobs", json!({}), cli.format).await?,
        None => {
            println!("jenkins-mcp - Jenkins builds as MCP tools");
            println!("Run with --help for usage information");
        }
    }

    Ok(())
}

/// Parts shared by every command that talks to Jenkins.
struct Runtime {
    settings: Settings,
    registry: Arc<CorrelationRegistry>,
    orchestrator: Arc<BuildOrchestrator>,
    dispatcher: Arc<ToolDispatcher>,
}

impl Runtime {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let settings = Settings::resolve(config, |key| std::env::var(key).ok())?;
        let client = JenkinsClient::new(&settings)?;
        let registry = Arc::new(CorrelationRegistry::new());
        let orchestrator = Arc::new(BuildOrchestrator::new(
            Arc::new(client),
            Arc::clone(&registry),
            &settings,
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&orchestrator), &settings));

        Ok(Self {
            settings,
            registry,
            orchestrator,
            dispatcher,
        })
    }
}

async fn serve(config: &Config, no_webhook: bool) -> anyhow::Result<()> {
    check_tool_table()?;
    let runtime = Runtime::build(config)?;
    tracing::info!(url = %runtime.settings.base_url, "Starting MCP server on stdio");

    let housekeeping = spawn_housekeeping(Arc::clone(&runtime.orchestrator), HOUSEKEEPING_INTERVAL);

    let (shutdown_tx, _) = broadcast::channel(1);
    let webhook = &runtime.settings.webhook;
    let listener_task = if webhook.enabled && !no_webhook {
        webhook.validate()?;
        if webhook.auth == WebhookAuth::Disabled {
            tracing::warn!("Webhook authentication is disabled; any caller can resolve builds");
        }
        let socket = WebhookListener::bind(&webhook.listen).await?;
        let ingestor = WebhookIngestor::new(
            WebhookNormalizer::new(webhook),
            Arc::clone(&runtime.registry),
        );
        let listener = Arc::new(WebhookListener::new(Arc::new(ingestor), webhook));
        Some(tokio::spawn(listener.serve(socket, shutdown_tx.subscribe())))
    } else {
        tracing::info!("Webhook listener disabled, relying on polling");
        None
    };

    let mut server = McpServer::new(Arc::clone(&runtime.dispatcher));
    let served = server.run().await;

    // No receivers when the listener never started; nothing to tell.
    let _ = shutdown_tx.send(());
    if let Some(task) = listener_task {
        if let Err(e) = task.await {
            tracing::warn!("Webhook listener ended abnormally: {}", e);
        }
    }
    housekeeping.abort();

    served.context("MCP server failed")
}

async fn run_tool(
    config_path: &Path,
    tool: &str,
    mut args: Value,
    format: Option<String>,
) -> anyhow::Result<()> {
    if let Some(format) = format {
        args["format"] = Value::String(format);
    }
    let config = Config::load_from(config_path)?;
    let runtime = Runtime::build(&config)?;

    let result = runtime.dispatcher.execute(tool, Some(args)).await;
    if result.error_code().is_some() {
        anyhow::bail!("{}", result.text());
    }
    println!("{}", result.text());
    Ok(())
}

fn handle_config(command: ConfigCommands, path: &Path) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = Config::load_from(path)?;
            println!("# {}", path.display());
            for key in CONFIG_KEYS {
                let value = config.get(key)?.unwrap_or_else(|| "(not set)".to_string());
                println!("{} = {}", key, value);
            }
        }
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Get { key } => {
            let config = Config::load_from(path)?;
            match config.get(&key)? {
                Some(value) => println!("{}", value),
                None => anyhow::bail!("{} is not set", key),
            }
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load_from(path)?;
            config.set(&key, &value)?;
            config.save_to(path)?;
            tracing::info!("Set {} in {}", key, path.display());
        }
    }
    Ok(())
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}
