//! Fleetway Worker - adaptive dispatch service for last-mile delivery
//!
//! Plans VRPTW routes, monitors their execution, and re-plans around
//! disruptions in real time.

mod cli;
mod config;
mod defaults;
mod error;
mod services;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::services::bus::EventBus;
use crate::services::eta::create_predictor;
use crate::services::matrix_cache::MatrixCache;
use crate::services::optimizer::{AdaptiveOptimizer, OptimizerConfig};
use crate::services::planning::{PlanningConfig, RoutePlanner};
use crate::services::push::spawn_push_gateway;
use crate::services::routing::{routing_with_fallback, MapApiConfig};
use crate::services::simulator::{ConditionSimulator, SimulationParams, TrafficView};
use crate::services::vrp::{SolverConfig, VrptwSolver};
use crate::store::{MemoryStore, RouteStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    match cli.command {
        Some(cli::Command::Serve { simulate, seed }) => run_server(config, simulate, seed).await,
        None => run_server(config, false, None).await,
    }
}

async fn run_server(config: config::Config, simulate: bool, seed: Option<u64>) -> Result<()> {
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,fleetway_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!("Starting Fleetway Worker...");
    info!("Configuration loaded");

    let store: Arc<dyn RouteStore> = Arc::new(MemoryStore::new());
    let bus = EventBus::default();

    let map_config = config.map_base_url.as_ref().map(|url| {
        let mut cfg = MapApiConfig::new(url.clone(), config.map_api_key.clone());
        cfg.requests_per_second = config.map_requests_per_second;
        cfg
    });
    let provider = routing_with_fallback(map_config, config.average_speed_kmh).await;
    let cache = Arc::new(MatrixCache::new(Duration::from_secs(config.matrix_cache_ttl_s)));

    let solver = Arc::new(VrptwSolver::new(SolverConfig {
        time_limit: Duration::from_secs(config.solver_time_limit_s),
        weights: config.objective_weights,
        fallback_speed_kmh: config.average_speed_kmh,
        ..SolverConfig::default()
    }));

    let eta = create_predictor(config.eta_model_path.as_deref().map(std::path::Path::new));

    let simulator = ConditionSimulator::new(
        bus.clone(),
        SimulationParams {
            seed: seed.unwrap_or(config.simulation_seed),
            ..SimulationParams::default()
        },
    );
    let traffic: Arc<dyn TrafficView> = Arc::new(simulator.clone());

    let _planner = RoutePlanner::new(
        Arc::clone(&store),
        bus.clone(),
        Arc::clone(&solver),
        Arc::clone(&provider),
        Arc::clone(&cache),
        eta,
        Arc::clone(&traffic),
        PlanningConfig::default(),
    );

    let optimizer = Arc::new(AdaptiveOptimizer::new(
        Arc::clone(&store),
        bus.clone(),
        solver,
        provider,
        cache,
        traffic,
        OptimizerConfig {
            monitor_interval: Duration::from_secs(config.monitor_interval_s),
            cooldown_minutes: config.reoptimization_cooldown_min,
            delay_threshold_min: config.delay_threshold_min,
            traffic_threshold: config.traffic_threshold,
            ..OptimizerConfig::default()
        },
    ));

    let shutdown = CancellationToken::new();

    let monitor = {
        let optimizer = Arc::clone(&optimizer);
        let token = shutdown.clone();
        tokio::spawn(async move { optimizer.run(token).await })
    };

    let _push_outbound = spawn_push_gateway(
        bus.clone(),
        Duration::from_secs(config.ws_heartbeat_s),
        shutdown.clone(),
    );

    if simulate {
        simulator.start();
        info!("Condition simulator enabled");
    }

    info!("Fleetway Worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    shutdown.cancel();
    simulator.stop();
    monitor.await?;

    info!("Fleetway Worker stopped");
    Ok(())
}
