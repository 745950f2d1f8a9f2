use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use dm_domain::config::{Config, ConfigSeverity};
use dm_gateway::api;
use dm_gateway::assets::AssetCatalog;
use dm_gateway::cli::{Cli, Command, ConfigCommand};
use dm_gateway::state::AppState;
use dm_gateway::tokens::TokenGate;
use dm_gateway::ws::registry::ConnectionRegistry;
use dm_services::{
    HttpAgentClient, LtmClient, ServiceHealth, StmClient, TtsClient, VlmClient,
};
use dm_speech::TextNormalizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = dm_gateway::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = dm_gateway::cli::load_config()?;
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count();
            println!(
                "{}: {} issue(s), {errors} error(s)",
                config_path.display(),
                issues.len()
            );
            if errors > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = dm_gateway::cli::load_config()?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("deskmated {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dm_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("DeskMate gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Text normalizer (rules compiled once) ────────────────────────
    let normalizer = Arc::new(
        TextNormalizer::new(&config.normalizer).context("compiling normalizer rules")?,
    );
    tracing::info!(rules = config.normalizer.rules.len(), "text normalizer ready");

    // ── Service adapters ─────────────────────────────────────────────
    let agent = Arc::new(
        HttpAgentClient::new(&config.agent).context("creating agent client")?,
    );
    let tts = Arc::new(TtsClient::new(&config.tts).context("creating TTS client")?);
    let vlm = Arc::new(VlmClient::new(&config.vlm).context("creating VLM client")?);
    let stm = Arc::new(StmClient::new(&config.stm).context("creating STM client")?);
    let ltm = Arc::new(LtmClient::new(&config.ltm).context("creating LTM client")?);
    tracing::info!(
        agent = %config.agent.base_url,
        tts = %config.tts.base_url,
        vlm = %config.vlm.base_url,
        "service adapters ready"
    );

    // Startup probes are advisory: a degraded sidecar service must not
    // prevent the gateway from serving.
    let probes: [(&str, Arc<dyn ServiceHealth>); 5] = [
        ("agent", agent.clone()),
        ("tts", tts.clone()),
        ("vlm", vlm.clone()),
        ("stm", stm.clone()),
        ("ltm", ltm.clone()),
    ];
    for (name, service) in &probes {
        if let Err(e) = service.initialize().await {
            tracing::warn!(service = name, error = %e, "service initialization failed");
        }
    }

    // ── Asset catalog ────────────────────────────────────────────────
    let assets = Arc::new(AssetCatalog::new(&config.assets));
    tracing::info!(
        backgrounds = assets.list_backgrounds().len(),
        avatar_configs = assets.list_avatar_configs().len(),
        "asset catalog ready"
    );

    // ── Connection registry ──────────────────────────────────────────
    let connections = Arc::new(ConnectionRegistry::new());

    // ── Token gates (env read once, digests kept) ────────────────────
    let api_gate = TokenGate::from_env(&config.server.api_token_env, "rest");
    let client_gate = TokenGate::from_env(&config.server.client_token_env, "stream");

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        agent,
        tts,
        vlm,
        stm,
        ltm,
        normalizer,
        connections,
        assets,
        api_gate,
        client_gate,
    };

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent = std::env::var("DM_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "DeskMate gateway listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

/// One allowed-origin pattern from `server.cors.allowed_origins`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    /// The origin string verbatim.
    Exact(String),
    /// `scheme://host:*`: any numeric port on that scheme+host. Holds the
    /// prefix up to and including the colon.
    AnyPort(String),
}

impl OriginRule {
    fn parse(raw: &str) -> Self {
        match raw.strip_suffix(":*") {
            Some(scheme_host) => Self::AnyPort(format!("{scheme_host}:")),
            None => Self::Exact(raw.to_owned()),
        }
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(exact) => origin == exact,
            // The tail after the colon must be a bare port number; a
            // crafted host like `localhost:3000.evil.com` has a dot in
            // the tail and is rejected.
            Self::AnyPort(prefix) => origin
                .strip_prefix(prefix.as_str())
                .is_some_and(|port| port.parse::<u16>().is_ok()),
        }
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Every configured entry becomes an [`OriginRule`]; requests are matched
/// against the whole rule set by a single predicate. A lone `"*"` entry
/// opens CORS entirely (credentials cannot be combined with it).
fn build_cors_layer(cors: &dm_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if cors.allowed_origins == ["*"] {
        tracing::warn!("CORS allows every origin");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let rules: Vec<OriginRule> = cors
        .allowed_origins
        .iter()
        .map(|raw| OriginRule::parse(raw))
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin
                .to_str()
                .map(|origin| rules.iter().any(|rule| rule.matches(origin)))
                .unwrap_or(false)
        }))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
