//! Per-phase aggregation strategies
//!
//! Each phase maps one raw collaborator record onto its canonical metric
//! set with a pure function. The three shapes:
//! - [`AggregationStrategy::FieldCopy`]: phases 1-2, copy top-level fields
//!   through a fixed metric → field table
//! - [`AggregationStrategy::LoadBalanceDerived`]: phase 3, compute synthetic
//!   metrics from the `metrics` sub-object
//! - [`AggregationStrategy::MetricsPassthrough`]: phase 4, copy `metrics`
//!   fields through, missing ones as `0`

use crate::types::{PhaseId, RawMetricsRecord};
use serde::Serialize;
use serde_json::{Map, Value};

/// Canonical metric name and the raw field it is copied from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricField {
    /// Output metric name
    pub metric: &'static str,
    /// Raw record field
    pub field: &'static str,
}

const fn copy(metric: &'static str, field: &'static str) -> MetricField {
    MetricField { metric, field }
}

/// Phase 1 table: consolidation baselines report canonical names directly
pub const PHASE1_FIELDS: &[MetricField] = &[
    copy("energyConsumption", "energyConsumption"),
    copy("vmMigrations", "vmMigrations"),
    copy("slaViolations", "slaViolations"),
    copy("nodeShutdowns", "nodeShutdowns"),
    copy("meanTimeBeforeShutdown", "meanTimeBeforeShutdown"),
    copy("meanTimeBeforeMigration", "meanTimeBeforeMigration"),
];

/// Phase 2 table
pub const PHASE2_FIELDS: &[MetricField] = &[
    copy("averagePredictedLoad", "avgPredictedLoad"),
    copy("averagePheromoneLevel", "avgPheromoneLevel"),
    copy("averageLoadVariance", "avgLoadVariance"),
    copy("averageMigrationCount", "avgMigrationCount"),
    copy("averageConsolidationEfficiency", "avgConsolidationEfficiency"),
];

/// Phase 3 output metrics, in [`DerivedLoadBalanceMetrics`] field order
pub const PHASE3_METRICS: [&str; 5] = [
    "averageTaskCompletionTime",
    "averageResourceUtilization",
    "averageLoadBalanceScore",
    "averageMigrationOverhead",
    "averageSLACompliance",
];

/// Phase 4 table, read from the `metrics` sub-object
pub const PHASE4_FIELDS: &[MetricField] = &[
    copy("balancedPercentage", "balancedPercentage"),
    copy("averageUtilization", "averageUtilization"),
    copy("loadVariance", "loadVariance"),
    copy("migrationCount", "totalMigrations"),
    copy("fitnessScore", "globalBestFitness"),
];

/// Value of `systemState` that earns full SLA compliance
pub const BALANCED_STATE: &str = "Balanced";

/// Extracted (metric, value) pairs in table order
pub type MetricSet = Vec<(&'static str, f64)>;

/// Why a record could not be mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    /// Required field absent
    Missing(&'static str),
    /// Field present but not a number
    NonNumeric(&'static str),
}

/// Raw inputs of the phase 3 derivation
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LoadBalanceSample {
    #[serde(rename = "totalVMs")]
    pub total_vms: f64,
    #[serde(rename = "loadedVMs")]
    pub loaded_vms: f64,
    #[serde(rename = "totalMigrations")]
    pub total_migrations: f64,
    #[serde(rename = "balancedPercentage")]
    pub balanced_percentage: f64,
    #[serde(rename = "loadPercentage")]
    pub load_percentage: f64,
    #[serde(rename = "systemState")]
    pub system_state: String,
}

/// Synthetic phase 3 metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedLoadBalanceMetrics {
    #[serde(rename = "avgTaskCompletionTime")]
    pub avg_task_completion_time: f64,
    #[serde(rename = "avgResourceUtilization")]
    pub avg_resource_utilization: f64,
    #[serde(rename = "avgLoadBalanceScore")]
    pub avg_load_balance_score: f64,
    #[serde(rename = "avgMigrationOverhead")]
    pub avg_migration_overhead: f64,
    #[serde(rename = "avgSLACompliance")]
    pub avg_sla_compliance: f64,
}

impl DerivedLoadBalanceMetrics {
    /// Derive from a sample. Pure; no hidden state.
    #[must_use]
    pub fn derive(sample: &LoadBalanceSample) -> Self {
        Self {
            avg_task_completion_time: sample.total_migrations * 10.0 + sample.total_vms * 0.5,
            avg_resource_utilization: sample.load_percentage,
            avg_load_balance_score: sample.balanced_percentage,
            avg_migration_overhead: sample.total_migrations * 2.5,
            avg_sla_compliance: if sample.system_state == BALANCED_STATE {
                100.0
            } else {
                80.0
            },
        }
    }

    /// Pair each value with its canonical metric name
    #[must_use]
    pub fn into_metric_set(self) -> MetricSet {
        vec![
            (PHASE3_METRICS[0], self.avg_task_completion_time),
            (PHASE3_METRICS[1], self.avg_resource_utilization),
            (PHASE3_METRICS[2], self.avg_load_balance_score),
            (PHASE3_METRICS[3], self.avg_migration_overhead),
            (PHASE3_METRICS[4], self.avg_sla_compliance),
        ]
    }
}

/// Tagged strategy mapping one raw record to its canonical metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    /// Copy top-level fields through a table; every field required
    FieldCopy(&'static [MetricField]),
    /// Phase 3 derivation from `metrics`
    LoadBalanceDerived,
    /// Copy `metrics` fields through a table; missing fields read as `0`
    MetricsPassthrough(&'static [MetricField]),
}

impl AggregationStrategy {
    /// Strategy used by a phase
    #[must_use]
    pub const fn for_phase(phase: PhaseId) -> Self {
        match phase {
            PhaseId::Phase1 => Self::FieldCopy(PHASE1_FIELDS),
            PhaseId::Phase2 => Self::FieldCopy(PHASE2_FIELDS),
            PhaseId::Phase3 => Self::LoadBalanceDerived,
            PhaseId::Phase4 => Self::MetricsPassthrough(PHASE4_FIELDS),
        }
    }

    /// Canonical metric names, in output order
    #[must_use]
    pub fn metric_names(&self) -> Vec<&'static str> {
        match self {
            Self::FieldCopy(table) | Self::MetricsPassthrough(table) => {
                table.iter().map(|f| f.metric).collect()
            }
            Self::LoadBalanceDerived => PHASE3_METRICS.to_vec(),
        }
    }

    /// Map one record
    ///
    /// Returns `Ok(None)` when a nested-metrics strategy finds no `metrics`
    /// object: the date is a gap, not a failure.
    ///
    /// # Errors
    /// Returns [`FieldError`] for absent required fields or non-numeric values
    pub fn extract(&self, record: &RawMetricsRecord) -> Result<Option<MetricSet>, FieldError> {
        match self {
            Self::FieldCopy(table) => {
                let mut set = MetricSet::with_capacity(table.len());
                for entry in *table {
                    let value = number(record.fields(), entry.field)?
                        .ok_or(FieldError::Missing(entry.field))?;
                    set.push((entry.metric, value));
                }
                Ok(Some(set))
            }
            Self::LoadBalanceDerived => {
                let Some(metrics) = record.metrics() else {
                    return Ok(None);
                };
                let sample = load_balance_sample(record, metrics)?;
                Ok(Some(DerivedLoadBalanceMetrics::derive(&sample).into_metric_set()))
            }
            Self::MetricsPassthrough(table) => {
                let Some(metrics) = record.metrics() else {
                    return Ok(None);
                };
                let mut set = MetricSet::with_capacity(table.len());
                for entry in *table {
                    set.push((entry.metric, number(metrics, entry.field)?.unwrap_or(0.0)));
                }
                Ok(Some(set))
            }
        }
    }
}

/// Read the phase 3 inputs; numbers default to `0`, `systemState` falls back
/// to the top-level record
fn load_balance_sample(
    record: &RawMetricsRecord,
    metrics: &Map<String, Value>,
) -> Result<LoadBalanceSample, FieldError> {
    let read = |field: &'static str| number(metrics, field).map(|v| v.unwrap_or(0.0));

    let system_state = metrics
        .get("systemState")
        .or_else(|| record.get("systemState"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(LoadBalanceSample {
        total_vms: read("totalVMs")?,
        loaded_vms: read("loadedVMs")?,
        total_migrations: read("totalMigrations")?,
        balanced_percentage: read("balancedPercentage")?,
        load_percentage: read("loadPercentage")?,
        system_state,
    })
}

/// Numeric field lookup; absent and `null` read as `None`
fn number(fields: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, FieldError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or(FieldError::NonNumeric(field)),
        Some(_) => Err(FieldError::NonNumeric(field)),
    }
}
