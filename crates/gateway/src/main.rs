mod auth;
mod pulse;
mod state;
mod store;
mod ws;

mod cli;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use tf_domain::config::{Config, ConfigSeverity};
use tf_domain::stage::{Behavior, Topology};
use tf_pipeline::event_sink::InMemoryEventSink;
use tf_pipeline::orchestrator::Orchestrator;
use tf_pipeline::provider_log::InMemoryProviderCallSink;
use tf_pipeline::summary::SummaryService;
use tf_providers::LlmRouter;
use tf_sessions::{IdentityResolver, SessionStateStore, SessionStore};

use cli::{Cli, Command, ConfigCommand};
use state::AppState;
use store::PulseStore;
use ws::connection::ConnectionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("turnflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tf_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("turnflow gateway starting");

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
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let router = Arc::new(
        LlmRouter::from_config(&config.llm, &config.circuit_breaker).context("initializing LLM router")?,
    );
    tracing::info!(providers = router.registry().len(), "LLM provider registry ready");

    let sessions =
        Arc::new(SessionStore::new(&config.persistence.state_dir).context("initializing session store")?);
    let identity = Arc::new(IdentityResolver::new());
    let default_topology = match config.server.default_pipeline_mode {
        tf_domain::config::PipelineMode::Fast => Topology::ChatFast,
        tf_domain::config::PipelineMode::Accurate | tf_domain::config::PipelineMode::AccurateFiller => {
            Topology::ChatAccurate
        }
    };
    let session_state = Arc::new(SessionStateStore::new(default_topology, Behavior::FreeConversation));
    tracing::info!("session management ready");

    let event_sink = InMemoryEventSink::new(config.persistence.max_events_in_memory);
    let call_log = Arc::new(InMemoryProviderCallSink::new(config.persistence.max_events_in_memory));
    let pulse = Arc::new(PulseStore::new(
        &config.persistence.state_dir,
        config.persistence.max_runs_in_memory,
        config.persistence.max_events_in_memory,
    ));
    tracing::info!("pulse store ready");

    let connections = ConnectionManager::new();
    let summaries = Arc::new(SummaryService::new(router.clone(), config.sessions.summary.clone(), config.llm.model_choice));
    let orchestrator = Arc::new(Orchestrator::new(event_sink.clone()));

    let pulse_token_hash = match std::env::var("TF_PULSE_TOKEN") {
        Ok(token) if !token.is_empty() => {
            tracing::info!("pulse bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("pulse bearer-token auth DISABLED — set TF_PULSE_TOKEN to enable");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        router,
        call_log,
        event_sink,
        pulse,
        connections,
        identity,
        sessions: sessions.clone(),
        session_state,
        summaries,
        orchestrator,
        pulse_token_hash,
    };

    {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(e) = sessions.flush() {
                    tracing::warn!(error = %e, "session store flush failed");
                }
            }
        });
    }

    let cors_layer = build_cors_layer(&config.server.cors);

    let max_concurrent = std::env::var("TF_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(requests_per_second = rl.requests_per_second, burst_size = rl.burst_size, "per-IP rate limiting enabled");

        GovernorLayer { config: std::sync::Arc::new(gov_config) }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    let router = Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(pulse::router(state.clone()))
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer { router.layer(gov).with_state(state) } else { router.with_state(state) };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "turnflow gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins
/// (not recommended for production).
fn build_cors_layer(cors: &tf_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
