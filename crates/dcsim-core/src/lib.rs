//! DCSim Core
//!
//! Precomputes benchmark results for four phases of datacenter-simulation
//! algorithms over a fixed set of trace dates and persists one canonical
//! JSON document per phase for a serving layer to read.
//!
//! # Pipeline
//!
//! 1. **Dataset** (optional): fetch and validate the trace archive
//! 2. **Phases 1-4**, strictly in order: run the collaborator once for all
//!    dates, aggregate its raw output, write `phase{N}-results.json`
//!
//! The first failure aborts the remaining phases; documents already written
//! stay in place.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dcsim_core::prelude::*;
//!
//! let config = PipelineConfig::load("dcsim.toml")?;
//! let pipeline = PrecalculationPipeline::from_config(config, &[])?;
//! let report = pipeline.run_all().await;
//! for (phase, elapsed) in report.per_phase_durations() {
//!     println!("{phase}: {elapsed:?}");
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod aggregator;
pub mod command;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod store;
pub mod strategy;
pub mod types;

// Re-exports
pub use error::*;
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::aggregator::{Aggregation, AggregationGap, GapReason, ResultAggregator};
    pub use crate::command::CommandOrchestrator;
    pub use crate::config::{CommandSpec, DatasetConfig, GapPolicy, PipelineConfig};
    pub use crate::error::{
        AggregationError, CollaboratorError, ConfigError, ErrorKind, PhaseError, StoreError,
    };
    pub use crate::pipeline::{
        DatasetOutcome, DatasetTask, DriverDecision, PhaseFailure, PhaseOutcome, PipelineReport,
        PipelineTask, PrecalculationPipeline, Stage,
    };
    pub use crate::runner::{PhaseOrchestrator, PhaseRunner};
    pub use crate::store::ResultStore;
    pub use crate::strategy::AggregationStrategy;
    pub use crate::types::{
        AlgorithmName, CanonicalResultDocument, PhaseId, RawMetricsRecord, RawPhaseResults,
        TraceDate,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
