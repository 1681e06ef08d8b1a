// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for the triangulation pipeline.
//!
//! Every error code follows the pattern `TRI-X###` where `X` is the
//! category letter and `###` is a three-digit number:
//!
//! - **T** — Transient external failures (retry and recover)
//! - **I** — Invalid payload (malformed LLM output, bad schema)
//! - **V** — Invariant violation (logged, dead-lettered, never retried)
//! - **F** — Fatal (contract violation, marks the run failed)
//! - **N** — Not found (downgraded to a warning, handled by the self-cleaner)

use std::fmt;

/// Enumeration of all catalog error codes, organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // ── Transient (T) ───────────────────────────────────────────────
    /// The LLM client timed out or returned a transient 5xx.
    LlmUnavailable,
    /// The cache did not respond within its command timeout.
    CacheTimeout,
    /// The queue backend did not respond within its command timeout.
    QueueTimeout,
    /// The relational store did not respond within its command timeout.
    StoreTimeout,
    /// The graph store did not respond within its command timeout.
    GraphTimeout,

    // ── Invalid payload (I) ─────────────────────────────────────────
    /// The LLM response could not be parsed as JSON even after sanitization.
    MalformedLlmResponse,
    /// A required field is missing from a job payload or LLM response.
    MissingRequiredField,
    /// The relationship type is not in the type registry.
    UnknownRelationshipType,
    /// The POI kind is not in the closed enumeration.
    UnknownPoiKind,

    // ── Invariant violation (V) ─────────────────────────────────────
    /// `received > expected` was observed for a relationship counter.
    ExpectationExceeded,
    /// A second reconcile job was dispatched for an already-reconciled hash.
    DuplicateReconcileDispatch,
    /// A counter was incremented for a hash with no seeded expectation.
    MissingExpectation,

    // ── Fatal (F) ────────────────────────────────────────────────────
    /// A manifest key that Scout should have seeded is missing.
    MissingManifestKey,
    /// Scout failed before the manifest became durable.
    ScoutContractViolation,

    // ── Not found (N) ────────────────────────────────────────────────
    /// A source file referenced by a job or POI no longer exists.
    FileNotFound,
    /// A POI id could not be resolved.
    PoiNotFound,
    /// No evidence rows exist for a relationship hash.
    RelationshipNotFound,
}

impl ErrorCode {
    /// Machine-readable code string (e.g. `"TRI-T001"`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LlmUnavailable => "TRI-T001",
            Self::CacheTimeout => "TRI-T002",
            Self::QueueTimeout => "TRI-T003",
            Self::StoreTimeout => "TRI-T004",
            Self::GraphTimeout => "TRI-T005",

            Self::MalformedLlmResponse => "TRI-I001",
            Self::MissingRequiredField => "TRI-I002",
            Self::UnknownRelationshipType => "TRI-I003",
            Self::UnknownPoiKind => "TRI-I004",

            Self::ExpectationExceeded => "TRI-V001",
            Self::DuplicateReconcileDispatch => "TRI-V002",
            Self::MissingExpectation => "TRI-V003",

            Self::MissingManifestKey => "TRI-F001",
            Self::ScoutContractViolation => "TRI-F002",

            Self::FileNotFound => "TRI-N001",
            Self::PoiNotFound => "TRI-N002",
            Self::RelationshipNotFound => "TRI-N003",
        }
    }

    /// Human-readable category label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::LlmUnavailable
            | Self::CacheTimeout
            | Self::QueueTimeout
            | Self::StoreTimeout
            | Self::GraphTimeout => "transient",

            Self::MalformedLlmResponse
            | Self::MissingRequiredField
            | Self::UnknownRelationshipType
            | Self::UnknownPoiKind => "invalid_payload",

            Self::ExpectationExceeded
            | Self::DuplicateReconcileDispatch
            | Self::MissingExpectation => "invariant_violation",

            Self::MissingManifestKey | Self::ScoutContractViolation => "fatal",

            Self::FileNotFound | Self::PoiNotFound | Self::RelationshipNotFound => "not_found",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The taxonomy-level error returned by pipeline components.
///
/// Each variant maps directly to one category of §7 of the
/// specification. [`TriError::is_retryable`] tells the queue layer
/// whether to redeliver the job or dead-letter it immediately.
#[derive(Debug, thiserror::Error)]
pub enum TriError {
    /// Recovered by bounded retry with backoff; surfaced only after exhaustion.
    #[error("[{code}] {message} (attempt {attempt})")]
    TransientExternal {
        /// Catalog code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
        /// Which attempt this is (1-indexed).
        attempt: u32,
    },

    /// Malformed LLM JSON, missing fields, non-whitelisted types.
    #[error("[{code}] {message}")]
    InvalidPayload {
        /// Catalog code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// A logic invariant was violated. Logged with full context, never retried.
    #[error("[{code}] {message}")]
    InvariantViolation {
        /// Catalog code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// A contract violation that marks the run `failed`.
    #[error("[{code}] {message}")]
    Fatal {
        /// Catalog code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// A referenced entity disappeared; downgraded to a warning.
    #[error("[{code}] {message}")]
    NotFound {
        /// Catalog code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// Escape hatch for I/O errors that do not yet have a catalog code.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriError {
    /// `true` if the queue layer should redeliver this job rather than
    /// dead-letter it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TriError::TransientExternal { .. })
    }

    /// The catalog [`ErrorCode`] for this error, if it has one.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            TriError::TransientExternal { code, .. }
            | TriError::InvalidPayload { code, .. }
            | TriError::InvariantViolation { code, .. }
            | TriError::Fatal { code, .. }
            | TriError::NotFound { code, .. } => Some(*code),
            TriError::Io(_) => None,
        }
    }
}

/// Convenience result type for pipeline operations.
pub type TriResult<T> = Result<T, TriError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        let e = TriError::TransientExternal {
            code: ErrorCode::LlmUnavailable,
            message: "timeout".into(),
            attempt: 1,
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn invariant_violation_is_not_retryable() {
        let e = TriError::InvariantViolation {
            code: ErrorCode::ExpectationExceeded,
            message: "received > expected".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn codes_are_unique() {
        let codes = [
            ErrorCode::LlmUnavailable,
            ErrorCode::CacheTimeout,
            ErrorCode::QueueTimeout,
            ErrorCode::StoreTimeout,
            ErrorCode::GraphTimeout,
            ErrorCode::MalformedLlmResponse,
            ErrorCode::MissingRequiredField,
            ErrorCode::UnknownRelationshipType,
            ErrorCode::UnknownPoiKind,
            ErrorCode::ExpectationExceeded,
            ErrorCode::DuplicateReconcileDispatch,
            ErrorCode::MissingExpectation,
            ErrorCode::MissingManifestKey,
            ErrorCode::ScoutContractViolation,
            ErrorCode::FileNotFound,
            ErrorCode::PoiNotFound,
            ErrorCode::RelationshipNotFound,
        ];
        let mut seen = std::collections::HashSet::new();
        for c in codes {
            assert!(seen.insert(c.code()), "duplicate code {}", c.code());
        }
    }
}
