//! Core types for the precalculation pipeline
//!
//! Defines the fundamental data model:
//! - Trace dates and algorithm names
//! - Phase identities and their fixed algorithms
//! - Raw collaborator records
//! - The canonical result document persisted per phase

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Algorithm exposed by the phase 3 collaborator
pub const PHASE3_ALGORITHM: &str = "TVPLCVPSOLB";

/// Algorithm exposed by the phase 4 collaborator
pub const PHASE4_ALGORITHM: &str = "ACOPSOHybrid";

/// PlanetLab workload trace days shared by every phase
pub const DEFAULT_TRACE_DATES: [&str; 10] = [
    "20110303", "20110306", "20110309", "20110322", "20110325", "20110403", "20110409",
    "20110411", "20110412", "20110420",
];

/// One day's workload trace, as an 8-digit `YYYYMMDD` string
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceDate(String);

impl TraceDate {
    /// Parse and validate a trace date
    ///
    /// # Errors
    /// Returns error unless the input is eight ASCII digits naming a real day
    pub fn parse(value: impl Into<String>) -> Result<Self, TraceDateError> {
        let value = value.into();
        if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TraceDateError::Shape(value));
        }
        if NaiveDate::parse_from_str(&value, "%Y%m%d").is_err() {
            return Err(TraceDateError::NotACalendarDay(value));
        }
        Ok(Self(value))
    }

    /// The raw `YYYYMMDD` string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar day this trace covers
    #[must_use]
    pub fn day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y%m%d").ok()
    }

    /// The default ten-day trace set
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        DEFAULT_TRACE_DATES
            .iter()
            .map(|d| Self((*d).to_string()))
            .collect()
    }
}

impl fmt::Display for TraceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TraceDate {
    type Err = TraceDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TraceDate {
    type Error = TraceDateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TraceDate> for String {
    fn from(date: TraceDate) -> Self {
        date.0
    }
}

impl Borrow<str> for TraceDate {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Trace date validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceDateError {
    /// Not eight digits
    #[error("trace date must be 8 digits (YYYYMMDD), got {0:?}")]
    Shape(String),

    /// Eight digits but no such day
    #[error("trace date {0:?} is not a calendar day")]
    NotACalendarDay(String),
}

/// Identifier of one simulation strategy within a phase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlgorithmName(String);

impl AlgorithmName {
    /// Create an algorithm name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlgorithmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for AlgorithmName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlgorithmName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One of the four benchmark phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PhaseId {
    /// Energy-aware VM consolidation baselines
    Phase1,
    /// Predictive ant-colony consolidation
    Phase2,
    /// Particle-swarm load balancing
    Phase3,
    /// Ant-colony / particle-swarm hybrid
    Phase4,
}

impl PhaseId {
    /// All phases in run order
    pub const ALL: [PhaseId; 4] = [Self::Phase1, Self::Phase2, Self::Phase3, Self::Phase4];

    /// Phase number (1-4)
    #[inline]
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Phase1 => 1,
            Self::Phase2 => 2,
            Self::Phase3 => 3,
            Self::Phase4 => 4,
        }
    }

    /// Phase for a number
    #[must_use]
    pub const fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Phase1),
            2 => Some(Self::Phase2),
            3 => Some(Self::Phase3),
            4 => Some(Self::Phase4),
            _ => None,
        }
    }

    /// File name of the persisted document
    #[must_use]
    pub fn artifact_file_name(self) -> String {
        format!("phase{}-results.json", self.number())
    }

    /// Single algorithm the phase exposes, if it is fixed
    #[must_use]
    pub fn fixed_algorithm(self) -> Option<AlgorithmName> {
        match self {
            Self::Phase1 | Self::Phase2 => None,
            Self::Phase3 => Some(AlgorithmName::new(PHASE3_ALGORITHM)),
            Self::Phase4 => Some(AlgorithmName::new(PHASE4_ALGORITHM)),
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase{}", self.number())
    }
}

impl FromStr for PhaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("phase").unwrap_or(s);
        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
            .ok_or_else(|| format!("unknown phase {s:?} (expected 1-4 or phase1-phase4)"))
    }
}

impl TryFrom<String> for PhaseId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PhaseId> for String {
    fn from(phase: PhaseId) -> Self {
        phase.to_string()
    }
}

/// What a phase collaborator returns for one (algorithm, date) pair
///
/// Shape varies per phase: phases 1-2 carry metric fields at the top level,
/// phases 3-4 nest them under `metrics`. A JSON `null` reads as an empty record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawMetricsRecord(Map<String, Value>);

impl RawMetricsRecord {
    /// Wrap a JSON object
    #[inline]
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Raw field lookup
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The nested `metrics` object, when present and an object
    #[must_use]
    pub fn metrics(&self) -> Option<&Map<String, Value>> {
        self.0.get("metrics").and_then(Value::as_object)
    }

    /// Failure message a collaborator left for this date
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    /// Underlying fields
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RawMetricsRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = Option::<Map<String, Value>>::deserialize(deserializer)?;
        Ok(Self(fields.unwrap_or_default()))
    }
}

impl TryFrom<Value> for RawMetricsRecord {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
    }
}

/// Collaborator output: algorithm → trace date → raw record
pub type RawPhaseResults = IndexMap<AlgorithmName, IndexMap<TraceDate, RawMetricsRecord>>;

/// Canonical result nesting: metric → algorithm → trace date → value
pub type MetricTable = IndexMap<String, IndexMap<AlgorithmName, IndexMap<TraceDate, f64>>>;

/// The persisted artifact for one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResultDocument {
    /// Whether the phase completed
    pub success: bool,
    /// Aggregated values
    pub results: MetricTable,
    /// Algorithms that contributed at least one value
    pub algorithms: Vec<AlgorithmName>,
    /// Trace dates that contributed at least one value, in configured order
    pub dates: Vec<TraceDate>,
    /// When the document was generated
    pub generated_at: DateTime<Utc>,
}

impl CanonicalResultDocument {
    /// Look up one value
    #[must_use]
    pub fn value(&self, metric: &str, algorithm: &str, date: &str) -> Option<f64> {
        self.results
            .get(metric)
            .and_then(|by_algo| by_algo.get(algorithm))
            .and_then(|by_date| by_date.get(date))
            .copied()
    }

    /// Configured dates absent from this document
    #[must_use]
    pub fn missing_dates(&self, configured: &[TraceDate]) -> Vec<TraceDate> {
        configured
            .iter()
            .filter(|d| !self.dates.contains(d))
            .cloned()
            .collect()
    }

    /// Whether every metric holds a value for every algorithm and configured date
    #[must_use]
    pub fn is_complete(&self, configured: &[TraceDate]) -> bool {
        self.dates.as_slice() == configured
            && self.results.values().all(|by_algo| {
                self.algorithms.iter().all(|algo| {
                    by_algo
                        .get(algo)
                        .is_some_and(|by_date| configured.iter().all(|d| by_date.contains_key(d)))
                })
            })
    }
}
