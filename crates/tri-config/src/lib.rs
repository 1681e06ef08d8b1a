// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and warnings for the triangulation
//! pipeline.
//!
//! [`PipelineConfig`] holds every recognized option from the external
//! interfaces contract. [`load_config`] loads it from TOML (falling
//! back to defaults when no path is given) and applies environment
//! overrides; [`validate`] produces advisory [`ConfigWarning`]s for
//! suspicious-but-legal values.
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Severity level for a configuration warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningSeverity {
    /// Informational note, not necessarily a problem.
    Info,
    /// Something likely unintended but not invalid.
    Warning,
}

/// A single advisory warning produced by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// Dot-delimited path to the field (e.g. `"confidence_threshold"`).
    pub field: String,
    /// Human-readable description of the issue.
    pub message: String,
    /// How severe this issue is.
    pub severity: WarningSeverity,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Per-`source_worker` reconciliation weights, keyed by [`tri_core::WorkerKind::config_key`].
pub type ReconcileWeights = BTreeMap<String, f64>;

fn default_reconcile_weights() -> ReconcileWeights {
    let mut weights = BTreeMap::new();
    weights.insert("file".to_string(), 1.0);
    weights.insert("directory".to_string(), 1.2);
    weights.insert("global".to_string(), 1.5);
    weights
}

/// Top-level runtime configuration for the triangulation pipeline.
///
/// Field defaults mirror the "Configuration — recognized options"
/// contract exactly: every default below is load-bearing, not a
/// placeholder.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reconciliation verdict cutoff, `0.0..=1.0`.
    pub confidence_threshold: f64,
    /// Per-job retry cap before dead-lettering.
    pub max_job_retries: u32,
    /// Exponential backoff base, in milliseconds.
    pub job_backoff_base_ms: u64,
    /// Outbox sidecar polling cadence, in milliseconds.
    pub outbox_poll_interval_ms: u64,
    /// Scout's filesystem-walker lease duration, in milliseconds.
    pub lock_lease_ms: u64,
    /// Scout's lease renewal interval, in milliseconds.
    pub lock_renewal_ms: u64,
    /// Reconciliation weight per source worker kind.
    pub reconcile_weights: ReconcileWeights,
    /// Graph-builder batch size.
    pub ingest_batch_size: u32,
    /// Per-job overall timeout, in seconds.
    pub job_timeout_secs: u64,
    /// Glob patterns Scout excludes from the walk.
    pub exclude_globs: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            max_job_retries: 3,
            job_backoff_base_ms: 1_000,
            outbox_poll_interval_ms: 500,
            lock_lease_ms: 30_000,
            lock_renewal_ms: 10_000,
            reconcile_weights: default_reconcile_weights(),
            ingest_batch_size: 100,
            job_timeout_secs: 600,
            exclude_globs: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    /// Looks up the reconciliation weight for `worker_kind`, falling
    /// back to `1.0` if the map has no entry (a future worker kind
    /// introduced without a config update should not silently zero
    /// out its evidence).
    #[must_use]
    pub fn weight_for(&self, worker_kind: &str) -> f64 {
        self.reconcile_weights.get(worker_kind).copied().unwrap_or(1.0)
    }
}

/// Loads configuration from TOML.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`PipelineConfig::default`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => PipelineConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parses a TOML string into a [`PipelineConfig`].
pub fn parse_toml(content: &str) -> Result<PipelineConfig, ConfigError> {
    toml::from_str::<PipelineConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Applies environment variable overrides.
///
/// Recognized variables: `TRI_CONFIDENCE_THRESHOLD`, `TRI_MAX_JOB_RETRIES`,
/// `TRI_OUTBOX_POLL_INTERVAL_MS`.
pub fn apply_env_overrides(config: &mut PipelineConfig) {
    if let Ok(val) = std::env::var("TRI_CONFIDENCE_THRESHOLD")
        && let Ok(parsed) = val.parse()
    {
        config.confidence_threshold = parsed;
    }
    if let Ok(val) = std::env::var("TRI_MAX_JOB_RETRIES")
        && let Ok(parsed) = val.parse()
    {
        config.max_job_retries = parsed;
    }
    if let Ok(val) = std::env::var("TRI_OUTBOX_POLL_INTERVAL_MS")
        && let Ok(parsed) = val.parse()
    {
        config.outbox_poll_interval_ms = parsed;
    }
}

/// Validates `config`, returning advisory warnings for legal but
/// suspicious values. Does not return [`ConfigError`] — callers that
/// want hard failures should check for [`WarningSeverity::Warning`]
/// entries above a threshold they choose.
#[must_use]
pub fn validate(config: &PipelineConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if !(0.0..=1.0).contains(&config.confidence_threshold) {
        warnings.push(ConfigWarning {
            field: "confidence_threshold".into(),
            message: "must be within [0.0, 1.0]".into(),
            severity: WarningSeverity::Warning,
        });
    } else if config.confidence_threshold < 0.1 || config.confidence_threshold > 0.99 {
        warnings.push(ConfigWarning {
            field: "confidence_threshold".into(),
            message: format!(
                "{} is near the extreme of the valid range; most relationships will be {}",
                config.confidence_threshold,
                if config.confidence_threshold < 0.1 { "validated" } else { "rejected" }
            ),
            severity: WarningSeverity::Info,
        });
    }

    if config.max_job_retries == 0 {
        warnings.push(ConfigWarning {
            field: "max_job_retries".into(),
            message: "0 retries means any transient failure dead-letters immediately".into(),
            severity: WarningSeverity::Warning,
        });
    }

    if config.ingest_batch_size == 0 {
        warnings.push(ConfigWarning {
            field: "ingest_batch_size".into(),
            message: "must be greater than 0".into(),
            severity: WarningSeverity::Warning,
        });
    }

    if config.lock_renewal_ms >= config.lock_lease_ms {
        warnings.push(ConfigWarning {
            field: "lock_renewal_ms".into(),
            message: "renewal interval should be smaller than the lease duration or the lease will expire between renewals".into(),
            severity: WarningSeverity::Warning,
        });
    }

    for worker in ["file", "directory", "global"] {
        if !config.reconcile_weights.contains_key(worker) {
            warnings.push(ConfigWarning {
                field: format!("reconcile_weights.{worker}"),
                message: "missing weight, will fall back to 1.0".into(),
                severity: WarningSeverity::Info,
            });
        }
    }

    warnings
}
