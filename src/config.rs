//! Engine configuration: normative limits, TOML loading, env overrides.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tuning knobs with normative defaults.
///
/// Values are intentionally explicit about their units to avoid confusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Workers in the default reaction pool.
    pub reaction_pool_size: usize,
    /// Workers in the default decision pool. Passes are short and CPU-bound;
    /// two workers cover bursts without oversubscribing.
    pub decision_pool_size: usize,
    /// Extra workers the default reaction pool may add around blocking
    /// regions.
    pub max_extra_workers: usize,
    /// Queue bound for explicitly bounded pools; 0 means unbounded.
    pub pool_queue_cap: usize,
    /// Log level junctions start at: 0 errors only, 1 lifecycle and
    /// warnings, 2 per-emission traces.
    pub default_log_level: u8,
    /// Pin the scheduling RNG for reproducing order-dependent bugs.
    pub scheduler_seed: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            reaction_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            decision_pool_size: 2,
            max_extra_workers: 256,
            pool_queue_cap: 0,
            default_log_level: 0,
            scheduler_seed: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Defaults with `RETORT_*` environment overrides applied on top.
    pub fn from_env() -> Config {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_usize("RETORT_REACTION_POOL_SIZE") {
            self.limits.reaction_pool_size = n.max(1);
        }
        if let Some(n) = env_usize("RETORT_DECISION_POOL_SIZE") {
            self.limits.decision_pool_size = n.max(1);
        }
        if let Some(n) = env_usize("RETORT_MAX_EXTRA_WORKERS") {
            self.limits.max_extra_workers = n;
        }
        if let Some(n) = env_usize("RETORT_POOL_QUEUE_CAP") {
            self.limits.pool_queue_cap = n;
        }
        if let Some(n) = env_usize("RETORT_LOG_LEVEL") {
            self.limits.default_log_level = n.min(u8::MAX as usize) as u8;
        }
        if let Some(n) = env_u64("RETORT_SCHEDULER_SEED") {
            self.limits.scheduler_seed = Some(n);
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}
