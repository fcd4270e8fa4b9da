//! Configuration loading for the sync core
//!
//! Settings are loaded from (in order of priority):
//! 1. Environment variable overrides (`NUTRI_PROBE_ENDPOINTS`, `NUTRI_MAX_RETRIES`)
//! 2. JSON file (~/.config/nutri/sync.json or an explicit path)
//! 3. Built-in defaults

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config filename in the Nutri config directory
const CONFIG_FILE: &str = "sync.json";

/// Comma-separated list of probe endpoints
const ENV_PROBE_ENDPOINTS: &str = "NUTRI_PROBE_ENDPOINTS";
/// Maximum retries per queued mutation
const ENV_MAX_RETRIES: &str = "NUTRI_MAX_RETRIES";

/// All settings of the sync core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub monitor: MonitorConfig,
    pub queue: QueueConfig,
    pub refresh: RefreshPolicy,
    pub orchestrator: OrchestratorConfig,
}

/// Reachability monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Probed in order; the first success marks us online
    pub probe_endpoints: Vec<String>,
    pub probe_timeout_ms: u64,
    /// Steady-state polling period
    pub poll_interval_ms: u64,
    /// Floor between two polling-triggered probes
    pub min_probe_interval_ms: u64,
    /// Wait after a passive online signal before probing
    pub settle_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_endpoints: vec![
                "https://www.google.com/generate_204".to_string(),
                "https://www.cloudflare.com/cdn-cgi/trace".to_string(),
                "https://1.1.1.1".to_string(),
            ],
            probe_timeout_ms: 6_000,
            poll_interval_ms: 20_000,
            min_probe_interval_ms: 5_000,
            settle_delay_ms: 1_000,
        }
    }
}

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Polling period, never shorter than the minimum probe interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(self.min_probe_interval_ms))
    }

    pub fn min_probe_interval(&self) -> Duration {
        Duration::from_millis(self.min_probe_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Pending-mutation queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Failed attempts tolerated before a mutation is dropped
    pub max_retries: u32,
    /// Timeout for each replayed write
    pub write_timeout_ms: u64,
    /// Delay after the first all-failed timer drain
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Fraction of the delay added as random jitter (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            write_timeout_ms: 10_000,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            jitter_factor: 0.2,
        }
    }
}

impl QueueConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// When cached daily stats are too old to trust
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Steady-state staleness threshold
    pub stale_after_ms: u64,
    /// Threshold right after a locally confirmed mutation (0 = refetch at once)
    pub stale_after_mutation_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            stale_after_ms: 30_000,
            stale_after_mutation_ms: 0,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Remote document holding the user profile and its daily stats
    pub user_path: String,
    /// Remote document holding the current meal plan
    pub plan_path: String,
    /// Field of both documents that holds the daily stats object
    pub stats_field: String,
    /// Timeout for direct (online) writes and refetches
    pub write_timeout_ms: u64,
    /// How long a target stays locked after a write completes
    pub guard_cooldown_ms: u64,
    /// Timeout for the external plan generator
    pub generation_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            user_path: "users/default".to_string(),
            plan_path: "mealPlans/default".to_string(),
            stats_field: "dailyStats".to_string(),
            write_timeout_ms: 10_000,
            guard_cooldown_ms: 400,
            generation_timeout_ms: 60_000,
        }
    }
}

impl OrchestratorConfig {
    /// Settings pointing at one user's documents
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_path: format!("users/{}", user_id),
            plan_path: format!("mealPlans/{}", user_id),
            ..Self::default()
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn guard_cooldown(&self) -> Duration {
        Duration::from_millis(self.guard_cooldown_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

impl SyncConfig {
    /// Load settings using the following priority:
    /// 1. Environment variable overrides
    /// 2. JSON file (~/.config/nutri/sync.json)
    /// 3. Defaults
    pub fn load() -> Result<Self> {
        let mut cfg = if config::config_exists(CONFIG_FILE) {
            config::load_json(CONFIG_FILE)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load settings from a specific JSON file (env overrides still apply)
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut cfg: SyncConfig = config::load_json_file(path)?;
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse settings from a JSON string; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: SyncConfig = serde_json::from_str(json).context("Failed to parse sync config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Get the default config file path (~/.config/nutri/sync.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }

    /// Write these settings to ~/.config/nutri/sync.json
    pub fn save(&self) -> Result<()> {
        self.validate()?;
        config::save_json(CONFIG_FILE, self)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoints) = lookup(ENV_PROBE_ENDPOINTS) {
            self.monitor.probe_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(retries) = lookup(ENV_MAX_RETRIES) {
            self.queue.max_retries = retries
                .trim()
                .parse()
                .with_context(|| format!("{} must be a non-negative integer", ENV_MAX_RETRIES))?;
        }

        Ok(())
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        for endpoint in &self.monitor.probe_endpoints {
            let parsed = url::Url::parse(endpoint)
                .with_context(|| format!("Invalid probe endpoint: {}", endpoint))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("Probe endpoint must be http(s): {}", endpoint);
            }
        }

        if self.monitor.probe_timeout_ms == 0
            || self.queue.write_timeout_ms == 0
            || self.orchestrator.write_timeout_ms == 0
            || self.orchestrator.generation_timeout_ms == 0
        {
            bail!("Network timeouts must be greater than zero");
        }

        if self.queue.backoff_max_ms < self.queue.backoff_base_ms {
            bail!(
                "backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.queue.backoff_max_ms,
                self.queue.backoff_base_ms
            );
        }

        if !(0.0..=1.0).contains(&self.queue.jitter_factor) {
            bail!("jitter_factor must be between 0.0 and 1.0");
        }

        Ok(())
    }
}
