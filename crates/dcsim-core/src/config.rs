//! Pipeline configuration
//!
//! Everything a run depends on is carried in one [`PipelineConfig`] value
//! handed to the pipeline, so independent pipelines (tests with a short
//! date list, for instance) never share state.
//!
//! ```toml
//! output_dir = "precalculated"
//! gap_policy = "skip"
//! dates = ["20110303", "20110306"]
//!
//! [dataset]
//! url = "https://example.org/planetlab.zip"
//! destination = "data/planetlab.zip"
//!
//! [phases.phase1]
//! program = "node"
//! args = ["orchestrators/phase1.js"]
//! timeout_secs = 3600
//! ```

use crate::error::ConfigError;
use crate::types::{PhaseId, TraceDate};
use dcsim_artifact::ContentDigest;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default download timeout
pub const DEFAULT_DATASET_TIMEOUT_SECS: u64 = 300;

/// How aggregation treats a date without metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Warn, leave the date out and still persist the document
    #[default]
    Skip,
    /// Fail the phase
    Strict,
}

/// Where to fetch the trace archive from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Source URL
    pub url: String,
    /// Local archive path
    pub destination: PathBuf,
    /// Transfer timeout in seconds
    #[serde(default = "default_dataset_timeout")]
    pub timeout_secs: u64,
    /// Pinned Blake3 digest of the archive
    #[serde(default)]
    pub expected_blake3: Option<ContentDigest>,
}

impl DatasetConfig {
    /// Transfer timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_dataset_timeout() -> u64 {
    DEFAULT_DATASET_TIMEOUT_SECS
}

/// External command implementing one phase's orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable
    pub program: String,
    /// Leading arguments; `--dates <d1,d2,...>` is appended
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the process after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trace dates every phase runs over, in output order
    pub dates: Vec<TraceDate>,
    /// Directory receiving `phase{N}-results.json`
    pub output_dir: PathBuf,
    /// Treatment of dates without metrics
    pub gap_policy: GapPolicy,
    /// Optional dataset acquisition step
    pub dataset: Option<DatasetConfig>,
    /// Phase collaborators
    pub phases: IndexMap<PhaseId, CommandSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dates: TraceDate::defaults(),
            output_dir: PathBuf::from("precalculated"),
            gap_policy: GapPolicy::Skip,
            dataset: None,
            phases: IndexMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With trace dates
    #[must_use]
    pub fn with_dates(mut self, dates: Vec<TraceDate>) -> Self {
        self.dates = dates;
        self
    }

    /// With output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// With gap policy
    #[must_use]
    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML or fails validation
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), dates = config.dates.len(), "config loaded");
        Ok(config)
    }

    /// Check invariants serde cannot express
    ///
    /// # Errors
    /// Returns the first violated invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dates.is_empty() {
            return Err(ConfigError::NoDates);
        }

        let mut seen = HashSet::with_capacity(self.dates.len());
        for date in &self.dates {
            if !seen.insert(date) {
                return Err(ConfigError::DuplicateDate(date.clone()));
            }
        }

        for (phase, spec) in &self.phases {
            if spec.program.trim().is_empty() {
                return Err(ConfigError::EmptyProgram(*phase));
            }
        }

        Ok(())
    }

    /// Collaborator command for a phase
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCollaborator`] if none is configured
    pub fn command_for(&self, phase: PhaseId) -> Result<&CommandSpec, ConfigError> {
        self.phases
            .get(&phase)
            .ok_or(ConfigError::MissingCollaborator(phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
output_dir = "out"
gap_policy = "strict"
dates = ["20110303", "20110306"]

[dataset]
url = "https://example.org/planetlab.zip"
destination = "data/planetlab.zip"

[phases.phase1]
program = "node"
args = ["orchestrators/phase1.js"]
timeout_secs = 600

[phases.phase4]
program = "./phase4"
"#;

    #[test]
    fn parses_full_config() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.dates.len(), 2);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.gap_policy, GapPolicy::Strict);

        let dataset = config.dataset.as_ref().unwrap();
        assert_eq!(dataset.timeout_secs, DEFAULT_DATASET_TIMEOUT_SECS);
        assert!(dataset.expected_blake3.is_none());

        let phase1 = config.command_for(PhaseId::Phase1).unwrap();
        assert_eq!(phase1.args, vec!["orchestrators/phase1.js".to_string()]);
        assert_eq!(phase1.timeout_secs, Some(600));
        assert!(config.command_for(PhaseId::Phase4).is_ok());
        assert!(matches!(
            config.command_for(PhaseId::Phase2),
            Err(ConfigError::MissingCollaborator(PhaseId::Phase2))
        ));
    }

    #[test]
    fn empty_text_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.dates.len(), 10);
        assert_eq!(config.gap_policy, GapPolicy::Skip);
    }

    #[test]
    fn rejects_duplicate_dates() {
        let err = PipelineConfig::from_toml_str(r#"dates = ["20110303", "20110303"]"#).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDate(_)));
    }

    #[test]
    fn rejects_empty_dates() {
        let err = PipelineConfig::from_toml_str("dates = []").unwrap_err();
        assert!(matches!(err, ConfigError::NoDates));
    }

    #[test]
    fn rejects_malformed_dates_at_parse_time() {
        let err = PipelineConfig::from_toml_str(r#"dates = ["2011-03-03"]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_empty_program() {
        let err = PipelineConfig::from_toml_str("[phases.phase2]\nprogram = \" \"").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyProgram(PhaseId::Phase2)));
    }

    #[test]
    fn rejects_unknown_phase() {
        let err = PipelineConfig::from_toml_str("[phases.phase7]\nprogram = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
