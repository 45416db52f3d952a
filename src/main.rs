// src/main.rs
//! Functions Engine
//!
//! Serves tenant functions over HTTP from pooled, isolated script engines.

use anyhow::{Context, Result};
use functions_engine::functions::{FunctionRegistry, FunctionService, ServiceConfig};
use functions_engine::host::{HostServices, HyperHttpClient, LogEmailer, UnavailableHostApi};
use functions_engine::observability::{init_metrics, init_tracing};
use functions_engine::runtime::{ConcurrencyGate, EnginePool, EnginePoolConfig, ExecutionCoordinator};
use functions_engine::server::TriggerServer;
use functions_engine::utils::config::EngineConfig;
use functions_engine::BuildInfo;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load().context("failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let build = BuildInfo::current();
    info!(
        git_hash = build.git_hash,
        built = build.build_timestamp,
        "Starting Functions Engine v{}",
        build.version
    );
    info!("Configuration loaded: {:?}", config);

    // Engine pool (idle reserve of pre-built engines)
    let pool_config = EnginePoolConfig::from(&config);
    info!("Initializing engine pool with max {} idle engines", pool_config.max_pool_size);
    let pool = Arc::new(EnginePool::with_config(pool_config)?);

    let gate = Arc::new(ConcurrencyGate::new(config.gate.max_concurrent)?);

    // Tenant functions
    let registry = Arc::new(FunctionRegistry::new());
    let directory = &config.functions.directory;
    if directory.is_dir() {
        registry.load_directory(directory).await?;
    } else {
        warn!("Functions directory {} not found; starting empty", directory.display());
    }

    let host = HostServices::new(
        Arc::new(UnavailableHostApi),
        Arc::new(LogEmailer::new()),
        Arc::new(HyperHttpClient::new(config.http_client.timeout())),
    );

    let service = Arc::new(FunctionService::new(
        registry,
        gate,
        ExecutionCoordinator::new(Arc::clone(&pool)),
        host,
        ServiceConfig::from(&config),
    ));

    // HTTP trigger server
    let addr = config.server_addr()?;
    let listener = TriggerServer::bind(addr).await?;
    let server = Arc::new(TriggerServer::new(Arc::clone(&service)));

    // Graceful shutdown handler
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal, cleaning up...");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    let outcome = server.serve(listener, shutdown).await;

    service.shutdown().await;
    info!("Engine pool stats at shutdown: {:?}", pool.stats());

    match outcome {
        Ok(()) => {
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}
