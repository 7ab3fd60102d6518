use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driftwatch_config::{find_config_path, load_config, save_config, Config, ModelRef};
use driftwatch_core::tools::github::{FileContentTool, HelperCommand, ListRepoFilesTool};
use driftwatch_core::{ModelPool, RigEngine, Runner, RunnerSettings, SseBus, ToolRegistry};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, groq, ollama, openai, openrouter};
use url::Url;

#[derive(Parser)]
#[command(name = "driftwatch", about = "Documentation drift checker agent", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the mention bus and serve forever
    Run,
    /// Show resolved configuration
    Status,
    /// Write a starter configuration file
    Onboard {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(base_filter))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Onboard { force } => run_onboard(&config_path, force),
        Commands::Status => {
            let config = load_config(&config_path)?;
            run_status(&config_path, &config)
        }
        Commands::Run => {
            let config = load_config(&config_path)?;
            run_worker(config).await
        }
    }
}

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(
    provider: &Option<driftwatch_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    provider
        .as_ref()
        .and_then(|p| p.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

/// Create a model handle for a provider + model combination.
///
/// Errors clearly if the provider is unknown or has no API key.
#[allow(deprecated)]
fn create_model_for(
    provider: &str,
    model_name: &str,
    config: &Config,
) -> Result<CompletionModelHandle<'static>> {
    if provider.is_empty() {
        anyhow::bail!(
            "No provider configured.\n\
             Valid providers: anthropic, openai, ollama, openrouter, groq"
        );
    }
    if model_name.is_empty() {
        anyhow::bail!("No model configured for provider '{provider}'.");
    }

    match provider {
        "anthropic" => {
            let key = resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Anthropic provider selected but no API key found. \
                         Set providers.anthropic.apiKey in config.json or ANTHROPIC_API_KEY."
                    )
                })?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name).with_prompt_caching();
            tracing::info!("Using Anthropic provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openai" => {
            let key =
                resolve_api_key(&config.providers.openai, "OPENAI_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenAI provider selected but no API key found. \
                         Set providers.openai.apiKey in config.json or OPENAI_API_KEY."
                    )
                })?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = config
                .providers
                .openai
                .as_ref()
                .and_then(|c| c.api_base.clone())
                .filter(|b| !b.is_empty())
            {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenAI provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = config
                .providers
                .ollama
                .as_ref()
                .and_then(|c| c.api_base.clone())
                .filter(|b| !b.is_empty())
            {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Ollama provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openrouter" => {
            let key = resolve_api_key(&config.providers.openrouter, "OPENROUTER_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenRouter provider selected but no API key found. \
                         Set providers.openrouter.apiKey in config.json or OPENROUTER_API_KEY."
                    )
                })?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create OpenRouter client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenRouter provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "groq" => {
            let key = resolve_api_key(&config.providers.groq, "GROQ_API_KEY").ok_or_else(|| {
                anyhow::anyhow!(
                    "Groq provider selected but no API key found. \
                     Set providers.groq.apiKey in config.json or GROQ_API_KEY."
                )
            })?;
            let client: groq::Client = groq::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create Groq client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Groq provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        other => {
            anyhow::bail!(
                "Unknown provider '{other}'. \
                 Valid providers: anthropic, openai, ollama, openrouter, groq"
            );
        }
    }
}

/// Build a ModelPool from config. Requires a "default" tier.
#[allow(deprecated)]
fn create_model_pool(config: &Config) -> Result<ModelPool> {
    if config.agent.models.is_empty() {
        anyhow::bail!(
            "No models configured. Set agent.models in config.json with at least a \"default\" entry.\n\
             Example:\n  \
             \"models\": {{ \"default\": {{ \"provider\": \"openai\", \"model\": \"gpt-4.1\" }} }}"
        );
    }
    if !config.agent.models.contains_key("default") {
        anyhow::bail!("config.agent.models must contain at least a \"default\" entry.");
    }

    let mut models = HashMap::new();
    for (tier, model_ref) in &config.agent.models {
        let handle = create_model_for(&model_ref.provider, &model_ref.model, config)
            .map_err(|e| anyhow::anyhow!("Failed to create model for tier '{tier}': {e}"))?;
        tracing::info!(
            "Model tier '{tier}': {} / {}",
            model_ref.provider,
            model_ref.model
        );
        models.insert(tier.clone(), (handle, model_ref.model.clone()));
    }

    Ok(ModelPool::new(models))
}

async fn run_worker(config: Config) -> Result<()> {
    let pool = create_model_pool(&config)?;
    let engine = Arc::new(RigEngine::new(
        pool,
        config.agent.temperature,
        config.agent.max_tokens,
    ));

    let mut tools = ToolRegistry::new();
    tools.register(Box::new(ListRepoFilesTool::new(HelperCommand::parse(
        &config.tools.github.list_command,
        config.tools.github.timeout_secs,
    )?)));
    tools.register(Box::new(FileContentTool::new(HelperCommand::parse(
        &config.tools.github.content_command,
        config.tools.github.timeout_secs,
    )?)));

    let endpoint = Url::parse(&config.bus.endpoint)
        .with_context(|| format!("invalid bus endpoint '{}'", config.bus.endpoint))?;
    let connector = Arc::new(SseBus::new(
        endpoint,
        config.bus.agent_id.clone(),
        config.bus.agent_description.clone(),
        Duration::from_secs(config.bus.read_timeout_secs),
    )?);

    let settings = RunnerSettings {
        max_attempts: config.runner.max_attempts,
        retry_delay: Duration::from_secs(config.runner.retry_delay_secs),
        persist_memory: config.runner.persist_memory_across_reconnects,
        mention_timeout: Duration::from_secs(config.bus.mention_timeout_secs),
        tool_invocation_limit: config.agent.tool_invocation_limit,
        window_size: config.agent.window_size,
    };

    tracing::info!(
        endpoint = %config.bus.endpoint,
        agent = %config.bus.agent_id,
        "Starting driftwatch worker"
    );

    let mut runner = Runner::new(settings, connector, engine.clone(), Arc::new(tools), engine);
    runner.run(&mut || false).await
}

fn run_status(config_path: &std::path::Path, config: &Config) -> Result<()> {
    println!("Config file:   {}", config_path.display());
    println!("Bus endpoint:  {}", config.bus.endpoint);
    println!("Agent id:      {}", config.bus.agent_id);
    println!(
        "Window size:   {} exchanges (tool limit {})",
        config.agent.window_size, config.agent.tool_invocation_limit
    );
    println!(
        "Reconnects:    {} attempts, {}s delay, persist memory: {}",
        config.runner.max_attempts,
        config.runner.retry_delay_secs,
        config.runner.persist_memory_across_reconnects
    );

    if config.agent.models.is_empty() {
        println!("Models:        (none configured, run `driftwatch onboard`)");
    } else {
        for (tier, model_ref) in &config.agent.models {
            println!(
                "Model tier:    {tier} -> {} / {}",
                model_ref.provider, model_ref.model
            );
        }
    }

    println!(
        "Lookup tools:  list='{}' content='{}' ({}s timeout)",
        config.tools.github.list_command,
        config.tools.github.content_command,
        config.tools.github.timeout_secs
    );
    Ok(())
}

fn run_onboard(config_path: &std::path::Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    let mut config = Config::default();
    config.agent.models.insert(
        "default".into(),
        ModelRef {
            provider: "openai".into(),
            model: "gpt-4.1".into(),
        },
    );
    config.agent.models.insert(
        "summary".into(),
        ModelRef {
            provider: "openai".into(),
            model: "gpt-4.1-mini".into(),
        },
    );

    save_config(config_path, &config)?;
    println!("Wrote starter config to {}", config_path.display());
    println!("Fill in providers.openai.apiKey (or export OPENAI_API_KEY) and bus.endpoint.");
    Ok(())
}
