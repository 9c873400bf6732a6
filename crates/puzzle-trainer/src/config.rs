//! Trainer configuration from environment variables

use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::TrainerError;

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    /// Path to Stockfish binary
    pub stockfish_path: String,

    /// Search depth for every engine analysis
    pub analysis_depth: u32,

    /// UCI `Threads` option
    pub engine_threads: u32,

    /// UCI `Hash` option, in MB
    pub engine_hash_mb: u32,

    /// Bound on the uci/isready handshake
    pub engine_init_timeout: Duration,

    /// Pause before an opponent reply is played on the board
    pub opponent_delay: Duration,
}

/// Settings consumed by the engine adapter.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: String,
    pub threads: u32,
    pub hash_mb: u32,
    pub init_timeout: Duration,
}

/// Settings consumed by the puzzle state machine.
#[derive(Clone, Debug)]
pub struct MachineConfig {
    pub opponent_delay: Duration,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            stockfish_path: "/usr/local/bin/stockfish".to_string(),
            analysis_depth: 15,
            engine_threads: 1,
            engine_hash_mb: 16,
            engine_init_timeout: Duration::from_secs(10),
            opponent_delay: Duration::from_millis(400),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        TrainerConfig::default().engine_config()
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        TrainerConfig::default().machine_config()
    }
}

impl TrainerConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Result<Self, TrainerError> {
        let defaults = Self::default();

        let stockfish_path = env::var("STOCKFISH_PATH").unwrap_or(defaults.stockfish_path);

        let analysis_depth = parse_var("ANALYSIS_DEPTH").unwrap_or(defaults.analysis_depth);
        if analysis_depth == 0 {
            return Err(TrainerError::Config("ANALYSIS_DEPTH must be positive".into()));
        }

        let engine_threads = parse_var("ENGINE_THREADS").unwrap_or(defaults.engine_threads);
        let engine_hash_mb = parse_var("ENGINE_HASH_MB").unwrap_or(defaults.engine_hash_mb);

        let engine_init_timeout = parse_var("ENGINE_INIT_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.engine_init_timeout);

        let opponent_delay = parse_var("OPPONENT_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.opponent_delay);

        let config = Self {
            stockfish_path,
            analysis_depth,
            engine_threads,
            engine_hash_mb,
            engine_init_timeout,
            opponent_delay,
        };
        info!(
            stockfish_path = %config.stockfish_path,
            depth = config.analysis_depth,
            "Trainer config loaded"
        );
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            path: self.stockfish_path.clone(),
            threads: self.engine_threads,
            hash_mb: self.engine_hash_mb,
            init_timeout: self.engine_init_timeout,
        }
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            opponent_delay: self.opponent_delay,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
