// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Gateway CLI
//!
//! The `aegis-gateway` binary boots the MCP tool-server lifecycle manager
//! and the HTTP intent/execution surface described by the tool-orchestration
//! gateway. It has one job: parse configuration, bring every enabled tool
//! server up, and serve the API until asked to stop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use gateway_core::application::config_loader::{parse_registry, resolve_environment};
use gateway_core::application::connection_pool::ConnectionPool;
use gateway_core::application::executor::ToolExecutor;
use gateway_core::application::launcher::{Launcher, ProcessTableHandle};
use gateway_core::application::orchestrator::Orchestrator;
use gateway_core::application::registry::ServerRegistry;
use gateway_core::application::supervisor::Supervisor;
use gateway_core::domain::repository::{LogRepository, SessionRepository, StorageBackend};
use gateway_core::domain::tool::ToolCatalogue;
use gateway_core::infrastructure::db::Database;
use gateway_core::infrastructure::llm::registry::ProviderRegistry;
use gateway_core::infrastructure::repositories::{in_memory, postgres};
use gateway_core::presentation::http::{self, AppState};

/// AEGIS Gateway - MCP tool-server lifecycle manager and intent router
#[derive(Parser)]
#[command(name = "aegis-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the tool-server registry file (mcpServers JSON)
    #[arg(short, long, env = "AEGIS_GATEWAY_CONFIG", value_name = "FILE")]
    config: PathBuf,

    /// HTTP API bind host
    #[arg(long, env = "AEGIS_GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// HTTP API bind port
    #[arg(long, env = "AEGIS_GATEWAY_PORT", default_value = "8000")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AEGIS_GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics exporter bind address
    #[arg(long, env = "AEGIS_GATEWAY_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;
    init_metrics(cli.metrics_addr)?;

    info!("starting AEGIS gateway");

    let raw_config = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read registry config at {}", cli.config.display()))?;
    let configs = parse_registry(&raw_config).context("failed to parse tool-server registry")?;
    for config in configs.values() {
        resolve_environment(config).context("required environment variable missing for a configured server")?;
    }
    info!(servers = configs.len(), "loaded tool-server registry");

    let registry = Arc::new(ServerRegistry::new());
    registry.load(configs);

    let llm_registry = Arc::new(ProviderRegistry::from_env().context("failed to initialize LLM provider")?);

    let processes = Arc::new(ProcessTableHandle::default());
    let launcher = Arc::new(Launcher::new(registry.clone(), processes.clone()));
    let supervisor = Arc::new(Supervisor::new(registry.clone(), processes.clone(), launcher.clone()));
    supervisor.ensure_running().await;

    let pool = Arc::new(ConnectionPool::new(registry.clone(), processes.clone(), launcher.clone(), supervisor.clone()));
    let executor = Arc::new(ToolExecutor::new(pool.clone(), llm_registry.provider()));

    let catalogue = build_catalogue(&registry, &pool).await;
    info!(tools = catalogue.len(), "assembled tool catalogue");

    let (sessions, logs): (Arc<dyn SessionRepository>, Arc<dyn LogRepository>) = match StorageBackend::from_env() {
        StorageBackend::Postgres(url) => {
            info!("using PostgreSQL repositories");
            let database = Database::new(&url).await.context("failed to connect to PostgreSQL")?;
            let pg_pool = database.get_pool().clone();
            (
                Arc::new(postgres::PostgresSessionRepository::new(pg_pool.clone())),
                Arc::new(postgres::PostgresLogRepository::new(pg_pool)),
            )
        }
        StorageBackend::InMemory => {
            info!("DATABASE_URL not set, using in-memory repositories");
            (
                Arc::new(in_memory::InMemorySessionRepository::default()),
                Arc::new(in_memory::InMemoryLogRepository::default()),
            )
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(llm_registry.provider(), executor, sessions, logs, catalogue));

    let shutdown = tokio_util::sync::CancellationToken::new();
    let supervisor_handle = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    let state = Arc::new(AppState { orchestrator, registry: registry.clone(), launcher: launcher.clone() });
    let app = http::router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gateway listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("HTTP server failed")?;

    shutdown.cancel();
    let _ = supervisor_handle.await;

    info!("shutting down tool servers");
    for name in registry.names() {
        let _ = launcher.stop_server(&name, true, Duration::from_secs(5)).await;
    }

    Ok(())
}

/// Starts every enabled server once (via the supervisor's bootstrap pass),
/// then pulls each one's cached tool list out of the connection pool to
/// assemble the catalogue handed to the orchestrator (spec.md §4 bootstrap
/// sequence, §6 "LLM tool specs").
async fn build_catalogue(registry: &ServerRegistry, pool: &ConnectionPool) -> ToolCatalogue {
    let mut tools = Vec::new();
    for name in registry.names() {
        if pool.acquire(&name).await.is_ok() {
            tools.extend(pool.cached_tools(&name));
        }
    }
    ToolCatalogue::new(tools)
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

fn init_metrics(addr: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
