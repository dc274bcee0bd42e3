//! Phase runner
//!
//! A phase's algorithm orchestrator is an external collaborator. The runner
//! invokes it once for the configured dates and screens its output for
//! per-date failure markers before anything is aggregated.

use crate::error::CollaboratorError;
use crate::types::{PhaseId, RawPhaseResults, TraceDate};
use async_trait::async_trait;
use std::sync::Arc;

/// Runs every algorithm of one phase over a set of trace dates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhaseOrchestrator: Send + Sync {
    /// Produce raw results for every algorithm the phase exposes
    async fn run(&self, dates: &[TraceDate]) -> Result<RawPhaseResults, CollaboratorError>;
}

/// Drives one phase's collaborator
#[derive(Clone)]
pub struct PhaseRunner {
    phase: PhaseId,
    orchestrator: Arc<dyn PhaseOrchestrator>,
}

impl std::fmt::Debug for PhaseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRunner")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl PhaseRunner {
    /// Create a runner for a phase
    #[must_use]
    pub fn new(phase: PhaseId, orchestrator: Arc<dyn PhaseOrchestrator>) -> Self {
        Self {
            phase,
            orchestrator,
        }
    }

    /// Phase this runner drives
    #[inline]
    #[must_use]
    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    /// Invoke the collaborator once and return its raw results
    ///
    /// # Errors
    /// Propagates the collaborator's own failure, and reports the first
    /// `{"error": ...}` record as [`CollaboratorError::DateFailed`]
    pub async fn run(&self, dates: &[TraceDate]) -> Result<RawPhaseResults, CollaboratorError> {
        tracing::info!(phase = %self.phase, dates = dates.len(), "running phase collaborator");

        let raw = self.orchestrator.run(dates).await?;

        for (algorithm, by_date) in &raw {
            for (date, record) in by_date {
                if let Some(message) = record.error_message() {
                    tracing::error!(
                        phase = %self.phase,
                        %algorithm,
                        %date,
                        message,
                        "collaborator reported failure"
                    );
                    return Err(CollaboratorError::DateFailed {
                        algorithm: algorithm.clone(),
                        date: date.clone(),
                        message: message.to_string(),
                    });
                }
            }
        }

        tracing::debug!(phase = %self.phase, algorithms = raw.len(), "collaborator finished");
        Ok(raw)
    }
}
