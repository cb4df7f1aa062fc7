use anyhow::{bail, Context};
use meld::cli::{Cli, Commands, ConfigAction, OutputFormat};
use meld::config::{Config, ConfigManager, ConfigValidator};
use meld::daemon::Server;
use meld::engine::{build_reference_engines, Corpus, HashingEmbedder};
use meld::orchestrator::{MeldService, SearchResponse, SystemStatus};
use meld::retrieval::{LexicalReranker, SearchRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Search {
            query,
            corpus,
            top_k,
            strategy,
            vector_weight,
            knowledge_bases,
            no_health,
            format,
        } => {
            let mut request = SearchRequest::new(query).with_knowledge_bases(knowledge_bases);
            request.top_k = top_k;
            request.strategy = strategy;
            request.vector_weight = vector_weight;
            cmd_search(cli.config, cli.profile, corpus, request, !no_health, format).await?;
        }
        Commands::Serve { corpus } => {
            cmd_serve(cli.config, cli.profile, corpus).await?;
        }
        Commands::Status { corpus, format } => {
            cmd_status(cli.config, cli.profile, corpus, format).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "meld=debug" } else { "meld=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries search output and the serve protocol
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(config_path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Ok(Config::default_path()?),
    }
}

fn load_manager(config_path: Option<PathBuf>, profile: Option<String>) -> anyhow::Result<ConfigManager> {
    let path = self::config_path(config_path)?;

    if path.exists() {
        return ConfigManager::from_file(&path, profile)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    tracing::warn!(
        path = %path.display(),
        "Config file not found, using defaults. Run 'meld config init' to create one."
    );
    let mut config = Config::default();
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
    }
    config.apply_env_overrides();
    Ok(ConfigManager::new(config)?)
}

async fn build_service(manager: ConfigManager, corpus: Option<PathBuf>) -> anyhow::Result<Arc<MeldService>> {
    let config = manager.get();
    let Some(corpus_path) = corpus.or_else(|| config.engines.corpus_path.clone()) else {
        bail!("No corpus given. Pass --corpus or set engines.corpus_path");
    };

    let corpus = Corpus::load(&corpus_path)?;
    if corpus.is_empty() {
        bail!("Corpus {} has no documents", corpus_path.display());
    }

    let embedder = Arc::new(HashingEmbedder::new(config.engines.embedding_dimension)?);
    let adapters = build_reference_engines(&config.engines, &corpus, embedder.clone()).await?;
    if adapters.is_empty() {
        bail!("Both reference engines are disabled");
    }

    let service = MeldService::builder(Arc::new(manager))
        .adapters(adapters)
        .embedder(embedder)
        .reranker(Arc::new(LexicalReranker))
        .build()?;
    Ok(service)
}

async fn cmd_search(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    corpus: Option<PathBuf>,
    request: SearchRequest,
    assess: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let manager = load_manager(config_path, profile)?;
    let service = build_service(manager, corpus).await?;

    if assess && service.health().is_enabled() {
        Arc::clone(&service).assess_health().await;
    }

    let response = service.search(request).await;
    service.shutdown().await;
    let response = response?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Table => print_response(&response),
    }
    Ok(())
}

fn snippet(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

fn print_response(response: &SearchResponse) {
    let diagnostics = &response.diagnostics;
    println!(
        "Strategy: {} ({})  Engines: {}  Fusion: {}  {}ms{}",
        response.strategy_used,
        diagnostics.strategy_reason,
        response.engine_used,
        diagnostics.fusion,
        response.elapsed_ms,
        if diagnostics.cache_hit { "  [cached]" } else { "" }
    );
    if let Some(reason) = &diagnostics.reason {
        println!("Unavailable: {}", reason);
    }
    if let Some(error) = &diagnostics.rerank_error {
        println!("Rerank skipped: {}", error);
    }
    println!();

    if response.results.is_empty() {
        println!("No results");
        return;
    }

    println!("{:>4}  {:>8}  {:<7}  {:<20}  CONTENT", "RANK", "SCORE", "SOURCE", "ID");
    for (rank, item) in response.results.iter().enumerate() {
        println!(
            "{:>4}  {:>8.4}  {:<7}  {:<20}  {}",
            rank + 1,
            item.rerank_score.unwrap_or(item.score),
            item.provenance,
            snippet(&item.key, 20),
            snippet(&item.content, 60)
        );
    }
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    corpus: Option<PathBuf>,
) -> anyhow::Result<()> {
    let manager = load_manager(config_path, profile)?;
    let service = build_service(manager, corpus).await?;
    service.start().await;

    let server = Server::new(Arc::clone(&service)).with_signals()?;
    let result = server
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    service.shutdown().await;
    Ok(result?)
}

async fn cmd_status(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    corpus: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let manager = load_manager(config_path, profile)?;
    let service = build_service(manager, corpus).await?;
    Arc::clone(&service).assess_health().await;

    let status = service.get_system_status();
    service.shutdown().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => print_status(&status),
    }
    Ok(())
}

fn print_status(status: &SystemStatus) {
    println!("Config version: {}", status.config_version);
    println!("Started:        {}", status.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!();

    println!(
        "{:<10}  {:<7}  {:<11}  {:>6}  {:>8}  {:>8}  {:<9}",
        "ENGINE", "KIND", "STATUS", "SCORE", "P95 MS", "SUCCESS", "BREAKER"
    );
    for engine in &status.health {
        let breaker = status
            .breaker_states
            .iter()
            .find(|b| b.name == engine.engine)
            .map(|b| b.state.to_string())
            .unwrap_or_else(|| "closed".to_string());
        println!(
            "{:<10}  {:<7}  {:<11}  {:>6.3}  {:>8.1}  {:>7.0}%  {:<9}",
            engine.engine,
            engine.kind,
            engine.status,
            engine.score,
            engine.latency_p95_ms,
            engine.success_rate * 100.0,
            breaker
        );
    }
    println!();

    let cache = &status.cache_stats;
    println!(
        "Cache:       {} ({}), {}/{} entries, hit rate {:.1}%",
        if cache.enabled { "enabled" } else { "disabled" },
        cache.policy,
        cache.entries,
        cache.capacity,
        cache.hit_rate * 100.0
    );
    let concurrency = &status.concurrency_stats;
    println!(
        "Concurrency: {} in flight, {} waiting, limit {}, peak {}",
        concurrency.in_flight, concurrency.waiting, concurrency.limit, concurrency.peak_in_flight
    );
}

fn cmd_config(config_path: Option<PathBuf>, profile: Option<String>, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let manager = load_manager(config_path, profile)?;
            let config = manager.get();
            let value = toml::Value::try_from(&*config)?;

            let shown = match section {
                Some(section) => match value.get(&section) {
                    Some(table) => {
                        let mut wrapper = toml::Table::new();
                        wrapper.insert(section, table.clone());
                        toml::Value::Table(wrapper)
                    }
                    None => bail!("Unknown config section: {}", section),
                },
                None => value,
            };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        ConfigAction::Set { key, value } => {
            let path = self::config_path(config_path)?;
            let config = if path.exists() {
                Config::load_unvalidated(&path)?
            } else {
                Config::default()
            };

            let updated = config.with_value(&key, &value)?;
            save_config(&updated, &path)?;
            println!("✓ Set {} = {}", key, value);
            println!("  Saved to: {}", path.display());
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(file) => file,
                None => self::config_path(config_path)?,
            };
            let config = Config::load_unvalidated(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            if let Some(profile) = profile {
                let mut profiled = config.clone();
                profiled.apply_profile(&profile)?;
                ConfigValidator::validate(&profiled)?;
                println!("  Profile '{}' is valid", profile);
            }
        }
        ConfigAction::Init { force } => {
            let path = self::config_path(config_path)?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            save_config(&Config::default(), &path)?;
            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Set engines.corpus_path to search without --corpus");
        }
    }

    Ok(())
}

fn save_config(config: &Config, path: &Path) -> anyhow::Result<()> {
    let mut config = config.clone();
    let now = chrono::Utc::now().to_rfc3339();
    if config.meta.created_at.is_empty() {
        config.meta.created_at = now.clone();
    }
    config.meta.last_modified = now;
    config.save(path)?;
    Ok(())
}
