//! Precalculation pipeline
//!
//! An ordered task list (optional dataset acquisition, then phases in
//! ascending order) executed by a single driver loop. Each task yields a
//! typed outcome or a [`PhaseError`]; [`DriverDecision::after`] decides
//! whether the loop continues. Artifacts written by earlier tasks are kept
//! when a later one fails.

use crate::aggregator::{Aggregation, AggregationGap, ResultAggregator};
use crate::command::CommandOrchestrator;
use crate::config::{DatasetConfig, PipelineConfig};
use crate::error::{ConfigError, ErrorKind, PhaseError};
use crate::runner::{PhaseOrchestrator, PhaseRunner};
use crate::store::ResultStore;
use crate::types::PhaseId;
use dcsim_artifact::{ArchiveTransport, DatasetAcquirer, DownloadArtifact};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of a pipeline task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Dataset acquisition
    Dataset,
    /// One phase
    Phase(PhaseId),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset => f.write_str("dataset"),
            Self::Phase(phase) => write!(f, "{phase}"),
        }
    }
}

/// Whether the driver runs the next task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverDecision {
    /// Run the next task
    Continue,
    /// Stop; remaining tasks are reported as skipped
    Abort,
}

impl DriverDecision {
    /// Decision after a task finished
    #[must_use]
    pub fn after<T>(result: &Result<T, PhaseError>) -> Self {
        match result {
            Ok(_) => Self::Continue,
            Err(_) => Self::Abort,
        }
    }
}

/// Fetch the trace archive before any phase runs
pub struct DatasetTask {
    acquirer: DatasetAcquirer,
    url: String,
    destination: PathBuf,
    force: bool,
}

impl fmt::Debug for DatasetTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetTask")
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl DatasetTask {
    /// Create a task fetching `url` into `destination`
    #[must_use]
    pub fn new(acquirer: DatasetAcquirer, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            acquirer,
            url: url.into(),
            destination: destination.into(),
            force: false,
        }
    }

    /// Create from the `[dataset]` config section
    #[must_use]
    pub fn from_config(config: &DatasetConfig, transport: Arc<dyn ArchiveTransport>) -> Self {
        let acquirer = DatasetAcquirer::new(transport).with_expected_digest(config.expected_blake3);
        Self::new(acquirer, config.url.clone(), config.destination.clone())
    }

    /// Download even when a valid archive is already present
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run the acquisition
    ///
    /// # Errors
    /// Returns [`PhaseError::Acquire`] on transport, write or validation failure
    pub async fn run(&self) -> Result<DatasetOutcome, PhaseError> {
        let started = Instant::now();

        if !self.force {
            if let Some(artifact) = self.acquirer.existing(&self.destination).await? {
                tracing::info!(
                    path = %artifact.path.display(),
                    digest = %artifact.digest.short(),
                    "valid archive already present, skipping download"
                );
                return Ok(DatasetOutcome {
                    artifact,
                    reused: true,
                    duration: started.elapsed(),
                });
            }
        }

        let artifact = self.acquirer.acquire(&self.url, &self.destination).await?;
        Ok(DatasetOutcome {
            artifact,
            reused: false,
            duration: started.elapsed(),
        })
    }
}

/// Result of the dataset task
#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    /// The validated archive
    pub artifact: DownloadArtifact,
    /// Whether an existing archive was kept instead of downloading
    pub reused: bool,
    /// Time taken
    pub duration: Duration,
}

/// Result of one successful phase
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: PhaseId,
    pub duration: Duration,
    /// Algorithms in the persisted document
    pub algorithms: usize,
    /// Dates in the persisted document
    pub dates: usize,
    /// Gaps skipped under the skip policy
    pub gaps: Vec<AggregationGap>,
    /// Where the document was written
    pub artifact: PathBuf,
}

/// A task that stopped the pipeline
#[derive(Debug)]
pub struct PhaseFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub error: PhaseError,
}

/// Summary of one pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    pub success: bool,
    pub dataset: Option<DatasetOutcome>,
    pub phases: Vec<PhaseOutcome>,
    pub failure: Option<PhaseFailure>,
    /// Tasks not run because an earlier one failed
    pub skipped: Vec<Stage>,
    pub total_duration: Duration,
}

impl PipelineReport {
    /// Duration of each completed phase, in run order
    #[must_use]
    pub fn per_phase_durations(&self) -> Vec<(PhaseId, Duration)> {
        self.phases.iter().map(|p| (p.phase, p.duration)).collect()
    }

    /// Total gaps across completed phases
    #[must_use]
    pub fn gap_count(&self) -> usize {
        self.phases.iter().map(|p| p.gaps.len()).sum()
    }
}

/// One entry of the driver's task list
#[derive(Debug)]
pub enum PipelineTask {
    Dataset(DatasetTask),
    Phase(PhaseRunner),
}

impl PipelineTask {
    /// Stage this task represents
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Dataset(_) => Stage::Dataset,
            Self::Phase(runner) => Stage::Phase(runner.phase()),
        }
    }
}

enum TaskOutput {
    Dataset(DatasetOutcome),
    Phase(PhaseOutcome),
}

/// Runs the dataset and phase tasks in order
#[derive(Debug)]
pub struct PrecalculationPipeline {
    config: PipelineConfig,
    aggregator: ResultAggregator,
    store: ResultStore,
    tasks: Vec<PipelineTask>,
}

impl PrecalculationPipeline {
    /// Create a pipeline with no tasks
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            aggregator: ResultAggregator::new(config.gap_policy),
            store: ResultStore::new(config.output_dir.clone()),
            config,
            tasks: Vec::new(),
        }
    }

    /// Create a pipeline running configured command collaborators
    ///
    /// An empty `selection` means every phase.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCollaborator`] for a selected phase
    /// without a `[phases.phaseN]` section
    pub fn from_config(config: PipelineConfig, selection: &[PhaseId]) -> Result<Self, ConfigError> {
        let selected: Vec<PhaseId> = if selection.is_empty() {
            PhaseId::ALL.to_vec()
        } else {
            selection.to_vec()
        };

        let mut orchestrators = Vec::with_capacity(selected.len());
        for phase in selected {
            let spec = config.command_for(phase)?.clone();
            orchestrators.push((phase, CommandOrchestrator::new(spec)));
        }

        let mut pipeline = Self::new(config);
        for (phase, orchestrator) in orchestrators {
            pipeline = pipeline.with_phase(phase, Arc::new(orchestrator));
        }
        Ok(pipeline)
    }

    /// Acquire the dataset before the phases
    #[must_use]
    pub fn with_dataset(mut self, task: DatasetTask) -> Self {
        self.tasks.retain(|t| t.stage() != Stage::Dataset);
        self.tasks.insert(0, PipelineTask::Dataset(task));
        self
    }

    /// Add or replace a phase; phases stay in ascending order
    #[must_use]
    pub fn with_phase(mut self, phase: PhaseId, orchestrator: Arc<dyn PhaseOrchestrator>) -> Self {
        let stage = Stage::Phase(phase);
        self.tasks.retain(|t| t.stage() != stage);
        let at = self
            .tasks
            .iter()
            .position(|t| matches!(t.stage(), Stage::Phase(other) if other > phase))
            .unwrap_or(self.tasks.len());
        self.tasks
            .insert(at, PipelineTask::Phase(PhaseRunner::new(phase, orchestrator)));
        self
    }

    /// Configuration this pipeline runs with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Store receiving phase documents
    #[inline]
    #[must_use]
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Stages in run order
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        self.tasks.iter().map(PipelineTask::stage).collect()
    }

    /// Run every task in order, stopping at the first failure
    pub async fn run_all(&self) -> PipelineReport {
        let started = Instant::now();
        tracing::info!(
            tasks = self.tasks.len(),
            dates = self.config.dates.len(),
            output_dir = %self.store.dir().display(),
            "precalculation started"
        );

        let mut report = PipelineReport {
            success: true,
            dataset: None,
            phases: Vec::new(),
            failure: None,
            skipped: Vec::new(),
            total_duration: Duration::ZERO,
        };

        let mut remaining = self.tasks.iter();
        for task in remaining.by_ref() {
            let stage = task.stage();
            let result = self.execute(task).await;
            let decision = DriverDecision::after(&result);

            match result {
                Ok(TaskOutput::Dataset(outcome)) => report.dataset = Some(outcome),
                Ok(TaskOutput::Phase(outcome)) => report.phases.push(outcome),
                Err(error) => {
                    let kind = error.kind();
                    tracing::error!(%stage, %kind, %error, "task failed");
                    report.success = false;
                    report.failure = Some(PhaseFailure { stage, kind, error });
                }
            }

            if decision == DriverDecision::Abort {
                break;
            }
        }

        report.skipped = remaining.map(PipelineTask::stage).collect();
        if !report.skipped.is_empty() {
            tracing::warn!(skipped = ?report.skipped, "remaining tasks aborted");
        }
        report.total_duration = started.elapsed();

        tracing::info!(
            success = report.success,
            phases = report.phases.len(),
            gaps = report.gap_count(),
            elapsed_ms = report.total_duration.as_millis(),
            "precalculation finished"
        );
        report
    }

    async fn execute(&self, task: &PipelineTask) -> Result<TaskOutput, PhaseError> {
        match task {
            PipelineTask::Dataset(dataset) => dataset.run().await.map(TaskOutput::Dataset),
            PipelineTask::Phase(runner) => self.run_phase(runner).await.map(TaskOutput::Phase),
        }
    }

    async fn run_phase(&self, runner: &PhaseRunner) -> Result<PhaseOutcome, PhaseError> {
        let phase = runner.phase();
        let started = Instant::now();

        let raw = runner.run(&self.config.dates).await?;
        let Aggregation { document, gaps } = self.aggregator.aggregate(phase, &raw, &self.config.dates)?;
        let artifact = self.store.write(phase, &document).await?;

        let outcome = PhaseOutcome {
            phase,
            duration: started.elapsed(),
            algorithms: document.algorithms.len(),
            dates: document.dates.len(),
            gaps,
            artifact,
        };
        tracing::info!(
            %phase,
            algorithms = outcome.algorithms,
            dates = outcome.dates,
            gaps = outcome.gaps.len(),
            elapsed_ms = outcome.duration.as_millis(),
            "phase complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::runner::MockPhaseOrchestrator;
    use crate::types::{RawPhaseResults, TraceDate};
    use serde_json::json;

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig::new()
            .with_dates(vec![TraceDate::parse("20110303").unwrap()])
            .with_output_dir(dir)
    }

    fn phase4_ok() -> Arc<dyn PhaseOrchestrator> {
        let mut mock = MockPhaseOrchestrator::new();
        mock.expect_run().times(1).returning(|_| {
            let raw: RawPhaseResults = serde_json::from_value(json!({
                "ACOPSOHybrid": {"20110303": {"metrics": {"totalMigrations": 3}}}
            }))
            .unwrap();
            Ok(raw)
        });
        Arc::new(mock)
    }

    fn never_called() -> Arc<dyn PhaseOrchestrator> {
        let mut mock = MockPhaseOrchestrator::new();
        mock.expect_run().times(0);
        Arc::new(mock)
    }

    #[test]
    fn decision_follows_result() {
        let ok: Result<(), PhaseError> = Ok(());
        let err: Result<(), PhaseError> = Err(CollaboratorError::Failed("x".into()).into());
        assert_eq!(DriverDecision::after(&ok), DriverDecision::Continue);
        assert_eq!(DriverDecision::after(&err), DriverDecision::Abort);
    }

    #[test]
    fn phases_are_kept_in_ascending_order() {
        let temp = tempfile::tempdir().unwrap();
        let pipeline = PrecalculationPipeline::new(config(temp.path()))
            .with_phase(PhaseId::Phase3, never_called())
            .with_phase(PhaseId::Phase1, never_called())
            .with_phase(PhaseId::Phase4, never_called())
            .with_phase(PhaseId::Phase1, never_called());
        assert_eq!(
            pipeline.stages(),
            vec![
                Stage::Phase(PhaseId::Phase1),
                Stage::Phase(PhaseId::Phase3),
                Stage::Phase(PhaseId::Phase4)
            ]
        );
    }

    #[test]
    fn from_config_requires_collaborators() {
        let temp = tempfile::tempdir().unwrap();
        let err = PrecalculationPipeline::from_config(config(temp.path()), &[PhaseId::Phase2]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCollaborator(PhaseId::Phase2)));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_phases() {
        let temp = tempfile::tempdir().unwrap();
        let mut failing = MockPhaseOrchestrator::new();
        failing
            .expect_run()
            .times(1)
            .returning(|_| Err(CollaboratorError::Failed("node crashed".into())));

        let pipeline = PrecalculationPipeline::new(config(temp.path()))
            .with_phase(PhaseId::Phase3, Arc::new(failing))
            .with_phase(PhaseId::Phase4, never_called());

        let report = pipeline.run_all().await;
        assert!(!report.success);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Stage::Phase(PhaseId::Phase3));
        assert_eq!(failure.kind, ErrorKind::Collaborator);
        assert_eq!(report.skipped, vec![Stage::Phase(PhaseId::Phase4)]);
        assert!(!pipeline.store().path_for(PhaseId::Phase3).exists());
    }

    #[tokio::test]
    async fn successful_phase_is_reported_and_persisted() {
        let temp = tempfile::tempdir().unwrap();
        let pipeline = PrecalculationPipeline::new(config(temp.path())).with_phase(PhaseId::Phase4, phase4_ok());

        let report = pipeline.run_all().await;
        assert!(report.success);
        assert!(report.failure.is_none());
        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.per_phase_durations()[0].0, PhaseId::Phase4);
        assert_eq!(report.phases[0].algorithms, 1);
        assert_eq!(report.phases[0].dates, 1);
        assert!(report.phases[0].artifact.exists());
    }
}
