// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Swarm Configuration Types
//
// Construction-time configuration for the orchestrator. Every field has a
// serde default so a partial YAML document (or none at all) is valid.
//
// Resolution order for load_or_default():
// 1. Explicit path argument
// 2. HIVE_CONFIG_PATH environment variable
// 3. ./hive-config.yaml
// 4. Built-in defaults
//
// Environment overrides are applied on top by apply_env_overrides().

use crate::domain::audit::AuditRetention;
use crate::domain::fusion::FusionMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Selections of one expert before a replica is spawned
    #[serde(default = "default_clone_threshold")]
    pub clone_threshold: u64,

    /// Draft/verifier similarity needed to accept a draft
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// EMA learning rate for performance updates
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Routing decisions kept before new ones are dropped
    #[serde(default = "default_routing_cache_max_size")]
    pub routing_cache_max_size: usize,

    /// Per-dispatch timeout in seconds
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_sec: f64,

    /// Prompt similarity at which an in-flight request is joined
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    /// Lifetime of exact-match results in the dedup cache
    #[serde(default = "default_dedup_cache_ttl")]
    pub dedup_cache_ttl_sec: u64,

    #[serde(default = "default_dedup_cache_capacity")]
    pub dedup_cache_capacity: usize,

    /// Re-routes allowed after the first failed dispatch in best-expert mode
    #[serde(default = "default_max_failover_retries")]
    pub max_failover_retries: u32,

    /// Experts consulted in mixture mode
    #[serde(default = "default_mixture_top_k")]
    pub mixture_top_k: usize,

    #[serde(default)]
    pub fusion_mode: FusionMode,

    #[serde(default = "default_evolution_history_limit")]
    pub evolution_history_limit: usize,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file the audit trail is appended to; in-memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,

    #[serde(default = "default_audit_max_tasks")]
    pub max_tasks: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_sec: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist_path: None,
            max_tasks: default_audit_max_tasks(),
            max_age_sec: None,
        }
    }
}

impl AuditConfig {
    pub fn retention(&self) -> AuditRetention {
        AuditRetention {
            max_tasks: self.max_tasks,
            max_age: self.max_age_sec.map(Duration::from_secs),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            clone_threshold: default_clone_threshold(),
            similarity_threshold: default_similarity_threshold(),
            learning_rate: default_learning_rate(),
            routing_cache_max_size: default_routing_cache_max_size(),
            dispatch_timeout_sec: default_dispatch_timeout(),
            dedup_threshold: default_dedup_threshold(),
            dedup_cache_ttl_sec: default_dedup_cache_ttl(),
            dedup_cache_capacity: default_dedup_cache_capacity(),
            max_failover_retries: default_max_failover_retries(),
            mixture_top_k: default_mixture_top_k(),
            fusion_mode: FusionMode::default(),
            evolution_history_limit: default_evolution_history_limit(),
            audit: AuditConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: SwarmConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file location
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HIVE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let local = PathBuf::from("./hive-config.yaml");
        if local.exists() {
            return Some(local);
        }

        None
    }

    /// Load from an explicit path, a discovered file, or defaults
    pub fn load_or_default(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = match path.or_else(Self::discover_config) {
            Some(path) => {
                tracing::info!("Loading swarm configuration from {:?}", path);
                Self::from_yaml_file(&path)?
            }
            None => {
                tracing::info!("No swarm configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u64>("HIVE_CLONE_THRESHOLD") {
            self.clone_threshold = value;
        }
        if let Some(value) = env_parse::<f64>("HIVE_DISPATCH_TIMEOUT_SEC") {
            self.dispatch_timeout_sec = value;
        }
        if let Ok(level) = std::env::var("HIVE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(path) = std::env::var("HIVE_AUDIT_PATH") {
            self.audit.persist_path = Some(PathBuf::from(path));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.clone_threshold == 0 {
            anyhow::bail!("clone_threshold must be at least 1");
        }

        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("dedup_threshold", self.dedup_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            anyhow::bail!("learning_rate must be within (0, 1], got {}", self.learning_rate);
        }

        if !(self.dispatch_timeout_sec.is_finite() && self.dispatch_timeout_sec > 0.0) {
            anyhow::bail!("dispatch_timeout_sec must be positive");
        }

        if self.routing_cache_max_size == 0 {
            anyhow::bail!("routing_cache_max_size must be at least 1");
        }

        if self.dedup_cache_capacity == 0 {
            anyhow::bail!("dedup_cache_capacity must be at least 1");
        }

        if self.audit.max_tasks == 0 {
            anyhow::bail!("audit.max_tasks must be at least 1");
        }

        if self.mixture_top_k == 0 {
            anyhow::bail!("mixture_top_k must be at least 1");
        }

        if !matches!(self.observability.log_format.as_str(), "compact" | "json") {
            anyhow::bail!(
                "observability.log_format must be 'compact' or 'json', got '{}'",
                self.observability.log_format
            );
        }

        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.dispatch_timeout_sec)
    }

    pub fn dedup_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_cache_ttl_sec)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={}", name, raw);
            None
        }
    }
}

fn default_clone_threshold() -> u64 {
    10
}

fn default_similarity_threshold() -> f64 {
    crate::domain::speculative::DEFAULT_ACCEPTANCE_THRESHOLD
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_routing_cache_max_size() -> usize {
    1000
}

fn default_dispatch_timeout() -> f64 {
    30.0
}

fn default_dedup_threshold() -> f64 {
    0.98
}

fn default_dedup_cache_ttl() -> u64 {
    60
}

fn default_dedup_cache_capacity() -> usize {
    512
}

fn default_max_failover_retries() -> u32 {
    3
}

fn default_mixture_top_k() -> usize {
    3
}

fn default_evolution_history_limit() -> usize {
    10_000
}

fn default_audit_max_tasks() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}
