//! Configuration management

use anyhow::{Context, Result};

use crate::services::vrp::ObjectiveWeights;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Mapping provider base URL (optional, falls back to haversine routing)
    pub map_base_url: Option<String>,

    /// Mapping provider API key
    pub map_api_key: Option<String>,

    /// Outbound rate limit towards the mapping provider
    pub map_requests_per_second: u32,

    /// Monitor cycle interval in seconds
    pub monitor_interval_s: u64,

    /// Delay before a route counts as late, in minutes
    pub delay_threshold_min: f64,

    /// Traffic factor above which a re-solve is considered
    pub traffic_threshold: f64,

    /// Minimum spacing between re-solves of one route, in minutes
    pub reoptimization_cooldown_min: i64,

    /// Objective weights (travel, waiting, adaptations)
    pub objective_weights: ObjectiveWeights,

    /// Static solve time budget in seconds
    pub solver_time_limit_s: u64,

    /// Matrix cache entry lifetime in seconds
    pub matrix_cache_ttl_s: u64,

    /// WebSocket heartbeat interval in seconds
    pub ws_heartbeat_s: u64,

    /// Average speed for haversine fallback timing, km/h
    pub average_speed_kmh: f64,

    /// Condition simulator RNG seed
    pub simulation_seed: u64,

    /// Path to a trained ETA model (optional, falls back to the heuristic)
    pub eta_model_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let map_base_url = std::env::var("MAP_BASE_URL").ok();
        let map_api_key = std::env::var("MAP_API_KEY").ok();

        let objective_weights = match std::env::var("OBJECTIVE_WEIGHTS") {
            Ok(raw) => parse_weights(&raw)
                .with_context(|| format!("invalid OBJECTIVE_WEIGHTS '{}'", raw))?,
            Err(_) => ObjectiveWeights::default(),
        };

        Ok(Self {
            map_base_url,
            map_api_key,
            map_requests_per_second: env_parse("MAP_REQUESTS_PER_SECOND", 10)?,
            monitor_interval_s: env_parse("MONITOR_INTERVAL_S", 60)?,
            delay_threshold_min: env_parse("DELAY_THRESHOLD_MIN", 15.0)?,
            traffic_threshold: env_parse("TRAFFIC_THRESHOLD", 1.5)?,
            reoptimization_cooldown_min: env_parse("REOPTIMIZATION_COOLDOWN_MIN", 30)?,
            objective_weights,
            solver_time_limit_s: env_parse("SOLVER_TIME_LIMIT_S", 30)?,
            matrix_cache_ttl_s: env_parse("MATRIX_CACHE_TTL_S", 86_400)?,
            ws_heartbeat_s: env_parse("WS_HEARTBEAT_S", 30)?,
            average_speed_kmh: env_parse("AVERAGE_SPEED_KMH", 40.0)?,
            simulation_seed: env_parse("SIMULATION_SEED", 42)?,
            eta_model_path: std::env::var("ETA_MODEL_PATH").ok(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid {} '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Parse "alpha,beta,gamma" into normalized objective weights.
fn parse_weights(raw: &str) -> Result<ObjectiveWeights> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .context("weights must be three comma-separated numbers")?;
    if parts.len() != 3 {
        anyhow::bail!("expected three weights, got {}", parts.len());
    }
    if parts.iter().any(|w| *w < 0.0) || parts.iter().sum::<f64>() <= 0.0 {
        anyhow::bail!("weights must be non-negative with a positive sum");
    }
    Ok(ObjectiveWeights::new(parts[0], parts[1], parts[2]))
}
