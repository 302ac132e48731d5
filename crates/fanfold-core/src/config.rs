//! Orchestrator configuration.
//!
//! All knobs the pipeline reads live in [`OrchestratorConfig`], which is
//! passed explicitly into each component at construction. Values come from
//! defaults, an optional TOML file, and `FANFOLD_*` environment overrides,
//! in that order.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::EvidenceMode;

pub const DEFAULT_PLANNER_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_WORKER_MODEL: &str = "claude-3-haiku-20240307";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid config value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// How worker instructions are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionScope {
    /// One planner call; the same instruction goes to every profile.
    Global,
    /// One planner call per profile, specialized to its capability.
    #[default]
    PerProfile,
}

/// What to do when some workers fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Synthesize from whatever succeeded; report the missing identities.
    #[default]
    ToleratePartial,
    /// Abort the run if any worker failed.
    AbortOnAny,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub planner_model: String,
    pub worker_model: String,
    pub max_tokens_planner: u32,
    pub max_tokens_worker: u32,
    /// Cap on simultaneous worker calls; `None` dispatches every profile at once.
    pub max_concurrent_workers: Option<usize>,
    pub worker_timeout_secs: Option<u64>,
    /// Overall budget for the fan-out; outstanding workers are cancelled when it expires.
    pub run_deadline_secs: Option<u64>,
    pub instruction_scope: InstructionScope,
    pub evidence_mode: EvidenceMode,
    pub failure_policy: FailurePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            planner_model: DEFAULT_PLANNER_MODEL.to_string(),
            worker_model: DEFAULT_WORKER_MODEL.to_string(),
            max_tokens_planner: 4096,
            max_tokens_worker: 2048,
            max_concurrent_workers: None,
            worker_timeout_secs: None,
            run_deadline_secs: None,
            instruction_scope: InstructionScope::default(),
            evidence_mode: EvidenceMode::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with `FANFOLD_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env_overrides()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)?.apply_env_overrides()
    }

    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FANFOLD_PLANNER_MODEL") {
            self.planner_model = v;
        }
        if let Some(v) = lookup("FANFOLD_WORKER_MODEL") {
            self.worker_model = v;
        }
        if let Some(v) = parse_var(&lookup, "FANFOLD_MAX_TOKENS_PLANNER")? {
            self.max_tokens_planner = v;
        }
        if let Some(v) = parse_var(&lookup, "FANFOLD_MAX_TOKENS_WORKER")? {
            self.max_tokens_worker = v;
        }
        if let Some(v) = parse_var(&lookup, "FANFOLD_MAX_CONCURRENT_WORKERS")? {
            self.max_concurrent_workers = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "FANFOLD_WORKER_TIMEOUT_SECS")? {
            self.worker_timeout_secs = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "FANFOLD_RUN_DEADLINE_SECS")? {
            self.run_deadline_secs = Some(v);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.planner_model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "planner_model",
                reason: "must not be empty".to_string(),
            });
        }
        if self.worker_model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "worker_model",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_tokens_planner == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tokens_planner",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_tokens_worker == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tokens_worker",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_concurrent_workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_workers",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: raw,
            }),
    }
}
