//! `tri doctor`: validates the active configuration and prints the
//! resolved values, mirroring this codebase's daemon-side diagnostic
//! commands.

use tri_config::{ConfigWarning, PipelineConfig};

/// Resolved configuration plus any advisory warnings against it.
pub struct DoctorReport {
    pub config: PipelineConfig,
    pub warnings: Vec<ConfigWarning>,
}

/// Runs `tri_config::validate` against `config` and bundles the result
/// for display.
#[must_use]
pub fn doctor(config: &PipelineConfig) -> DoctorReport {
    let warnings = tri_config::validate(config);
    DoctorReport { config: config.clone(), warnings }
}

impl std::fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "confidence_threshold:    {}", self.config.confidence_threshold)?;
        writeln!(f, "max_job_retries:         {}", self.config.max_job_retries)?;
        writeln!(f, "job_backoff_base_ms:     {}", self.config.job_backoff_base_ms)?;
        writeln!(f, "outbox_poll_interval_ms: {}", self.config.outbox_poll_interval_ms)?;
        writeln!(f, "lock_lease_ms:           {}", self.config.lock_lease_ms)?;
        writeln!(f, "lock_renewal_ms:         {}", self.config.lock_renewal_ms)?;
        writeln!(f, "ingest_batch_size:       {}", self.config.ingest_batch_size)?;
        writeln!(f, "job_timeout_secs:        {}", self.config.job_timeout_secs)?;
        writeln!(f, "exclude_globs:           {:?}", self.config.exclude_globs)?;
        for (kind, weight) in &self.config.reconcile_weights {
            writeln!(f, "reconcile_weights.{kind}: {weight}")?;
        }
        if self.warnings.is_empty() {
            write!(f, "warnings:                none")
        } else {
            writeln!(f, "warnings:")?;
            for (i, w) in self.warnings.iter().enumerate() {
                if i + 1 == self.warnings.len() {
                    write!(f, "  - {w}")?;
                } else {
                    writeln!(f, "  - {w}")?;
                }
            }
            Ok(())
        }
    }
}
