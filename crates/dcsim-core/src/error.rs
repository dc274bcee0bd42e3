//! Error types for the precalculation pipeline
//!
//! Provides error handling for:
//! - Configuration loading and validation
//! - Phase collaborator failures
//! - Aggregation gaps and malformed records
//! - Result persistence
//!
//! [`PhaseError`] is what a pipeline task yields on failure; its
//! [`ErrorKind`] lets callers branch without matching on messages.

use crate::types::{AlgorithmName, PhaseId, TraceDate, TraceDateError};
use dcsim_artifact::{AcquireError, AcquireErrorKind};
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// No trace dates configured
    #[error("at least one trace date must be configured")]
    NoDates,

    /// A trace date appears twice
    #[error("duplicate trace date {0}")]
    DuplicateDate(TraceDate),

    /// A trace date failed validation
    #[error(transparent)]
    InvalidDate(#[from] TraceDateError),

    /// A phase command has no program
    #[error("{0}: collaborator program must not be empty")]
    EmptyProgram(PhaseId),

    /// A phase was requested but has no collaborator configured
    #[error("no collaborator configured for {0}; add a [phases.{0}] section")]
    MissingCollaborator(PhaseId),

    /// Dataset acquisition requested without a `[dataset]` section
    #[error("no [dataset] section configured")]
    MissingDataset,
}

/// Failures of a phase's algorithm orchestrator
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Process could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process IO failed while running
    #[error("io error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    /// Process ran past its deadline
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// Output was not a raw result set
    #[error("{program} produced malformed output: {message}")]
    MalformedOutput { program: String, message: String },

    /// Collaborator reported a failure for one date
    #[error("{algorithm} failed on {date}: {message}")]
    DateFailed {
        algorithm: AlgorithmName,
        date: TraceDate,
        message: String,
    },

    /// Any other collaborator failure
    #[error("collaborator failed: {0}")]
    Failed(String),
}

/// Aggregation errors
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    /// A date had no metrics and the gap policy is strict
    #[error("{phase}: no metrics for {algorithm} on {date}")]
    Gap {
        phase: PhaseId,
        algorithm: AlgorithmName,
        date: TraceDate,
    },

    /// A direct-copy field is absent
    #[error("{phase}: {algorithm} on {date} lacks field {field:?}")]
    MissingField {
        phase: PhaseId,
        algorithm: AlgorithmName,
        date: TraceDate,
        field: &'static str,
    },

    /// A field holds something other than a number
    #[error("{phase}: {algorithm} on {date} has non-numeric field {field:?}")]
    NonNumeric {
        phase: PhaseId,
        algorithm: AlgorithmName,
        date: TraceDate,
        field: &'static str,
    },
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Output directory could not be created
    #[error("cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded
    #[error("cannot encode document: {0}")]
    Encode(#[from] serde_json::Error),

    /// Write or rename failed
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted document could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted document is not a valid result document
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Error taxonomy callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Archive could not be fetched
    Transport,
    /// Fetched bytes are not the archive
    Validation,
    /// A phase orchestrator failed
    Collaborator,
    /// A date without metrics under the strict gap policy
    AggregationGap,
    /// A malformed raw record
    Aggregation,
    /// Local storage failed
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Transport => "transport",
            Self::Validation => "validation",
            Self::Collaborator => "collaborator",
            Self::AggregationGap => "aggregation gap",
            Self::Aggregation => "aggregation",
            Self::Storage => "storage",
        };
        f.write_str(label)
    }
}

/// Failure of one pipeline task
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    /// Dataset acquisition failed
    #[error("dataset acquisition failed: {0}")]
    Acquire(#[from] AcquireError),

    /// Collaborator failed
    #[error("collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Aggregation failed
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    /// Persistence failed
    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}

impl PhaseError {
    /// Taxonomy kind of this failure
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquire(e) => match e.kind() {
                AcquireErrorKind::Transport => ErrorKind::Transport,
                AcquireErrorKind::Validation => ErrorKind::Validation,
                AcquireErrorKind::Write => ErrorKind::Storage,
            },
            Self::Collaborator(_) => ErrorKind::Collaborator,
            Self::Aggregation(AggregationError::Gap { .. }) => ErrorKind::AggregationGap,
            Self::Aggregation(_) => ErrorKind::Aggregation,
            Self::Store(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcsim_artifact::TransportError;

    fn date() -> TraceDate {
        TraceDate::parse("20110303").unwrap()
    }

    #[test]
    fn phase_error_kinds() {
        let transport = PhaseError::from(AcquireError::from(TransportError::Request {
            url: "https://example.org".into(),
            message: "dns".into(),
        }));
        assert_eq!(transport.kind(), ErrorKind::Transport);

        let collaborator = PhaseError::from(CollaboratorError::Failed("boom".into()));
        assert_eq!(collaborator.kind(), ErrorKind::Collaborator);

        let gap = PhaseError::from(AggregationError::Gap {
            phase: PhaseId::Phase3,
            algorithm: AlgorithmName::new("TVPLCVPSOLB"),
            date: date(),
        });
        assert_eq!(gap.kind(), ErrorKind::AggregationGap);

        let missing = PhaseError::from(AggregationError::MissingField {
            phase: PhaseId::Phase1,
            algorithm: AlgorithmName::new("LrMmt"),
            date: date(),
            field: "energyConsumption",
        });
        assert_eq!(missing.kind(), ErrorKind::Aggregation);
    }

    #[test]
    fn missing_collaborator_message_names_section() {
        let err = ConfigError::MissingCollaborator(PhaseId::Phase2);
        assert_eq!(
            err.to_string(),
            "no collaborator configured for phase2; add a [phases.phase2] section"
        );
    }
}
