//! Result aggregation
//!
//! Turns one phase's raw result set into a [`CanonicalResultDocument`]:
//! metric → algorithm → trace date → value. Output order is fixed by the
//! strategy's metric table, the collaborator's algorithm order and the
//! configured date order, so identical inputs serialize identically.

use crate::config::GapPolicy;
use crate::error::AggregationError;
use crate::strategy::{AggregationStrategy, FieldError};
use crate::types::{
    AlgorithmName, CanonicalResultDocument, MetricTable, PhaseId, RawPhaseResults, TraceDate,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;

/// Why a (algorithm, date) pair produced no values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GapReason {
    /// Collaborator returned nothing for the algorithm
    MissingAlgorithm,
    /// Collaborator returned nothing for the date
    MissingDate,
    /// Record present without a `metrics` object
    MissingMetrics,
    /// Collaborator returned no algorithms at all
    NoAlgorithms,
}

/// Algorithm name recorded on gaps not tied to one algorithm
pub const ANY_ALGORITHM: &str = "*";

/// A configured (algorithm, date) pair absent from the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationGap {
    pub algorithm: AlgorithmName,
    pub date: TraceDate,
    pub reason: GapReason,
}

/// Aggregated document plus the gaps skipped on the way
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub document: CanonicalResultDocument,
    pub gaps: Vec<AggregationGap>,
}

/// Maps raw phase results onto the canonical schema
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator {
    policy: GapPolicy,
}

impl ResultAggregator {
    /// Create an aggregator with a gap policy
    #[inline]
    #[must_use]
    pub fn new(policy: GapPolicy) -> Self {
        Self { policy }
    }

    /// Active gap policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> GapPolicy {
        self.policy
    }

    /// Aggregate with the current time as `generatedAt`
    ///
    /// # Errors
    /// See [`ResultAggregator::aggregate_at`]
    pub fn aggregate(
        &self,
        phase: PhaseId,
        raw: &RawPhaseResults,
        dates: &[TraceDate],
    ) -> Result<Aggregation, AggregationError> {
        self.aggregate_at(phase, raw, dates, Utc::now())
    }

    /// Aggregate one phase
    ///
    /// Phases with a fixed algorithm read only that algorithm from `raw`;
    /// the others take every algorithm in collaborator order.
    ///
    /// # Errors
    /// - [`AggregationError::Gap`] on the first gap under [`GapPolicy::Strict`]
    /// - [`AggregationError::MissingField`] / [`AggregationError::NonNumeric`]
    ///   for malformed records
    pub fn aggregate_at(
        &self,
        phase: PhaseId,
        raw: &RawPhaseResults,
        dates: &[TraceDate],
        generated_at: DateTime<Utc>,
    ) -> Result<Aggregation, AggregationError> {
        let strategy = AggregationStrategy::for_phase(phase);
        let candidates: Vec<AlgorithmName> = match phase.fixed_algorithm() {
            Some(name) => vec![name],
            None => raw.keys().cloned().collect(),
        };

        let mut results: MetricTable = strategy
            .metric_names()
            .into_iter()
            .map(|metric| (metric.to_string(), IndexMap::new()))
            .collect();
        let mut algorithms = Vec::with_capacity(candidates.len());
        let mut covered: HashSet<&TraceDate> = HashSet::with_capacity(dates.len());
        let mut gaps = Vec::new();

        if candidates.is_empty() {
            for date in dates {
                let gap = AggregationGap {
                    algorithm: AlgorithmName::new(ANY_ALGORITHM),
                    date: date.clone(),
                    reason: GapReason::NoAlgorithms,
                };
                self.record_gap(phase, gap, &mut gaps)?;
            }
        }

        for algorithm in &candidates {
            let by_date = raw.get(algorithm);
            let mut contributed = false;

            for date in dates {
                let extracted = match by_date {
                    None => Err(GapReason::MissingAlgorithm),
                    Some(by_date) => match by_date.get(date) {
                        None => Err(GapReason::MissingDate),
                        Some(record) => strategy
                            .extract(record)
                            .map_err(|e| field_error(e, phase, algorithm, date))?
                            .ok_or(GapReason::MissingMetrics),
                    },
                };

                match extracted {
                    Ok(set) => {
                        for (metric, value) in set {
                            results
                                .entry(metric.to_string())
                                .or_default()
                                .entry(algorithm.clone())
                                .or_default()
                                .insert(date.clone(), value);
                        }
                        contributed = true;
                        covered.insert(date);
                    }
                    Err(reason) => {
                        let gap = AggregationGap {
                            algorithm: algorithm.clone(),
                            date: date.clone(),
                            reason,
                        };
                        self.record_gap(phase, gap, &mut gaps)?;
                    }
                }
            }

            if contributed {
                algorithms.push(algorithm.clone());
            }
        }

        let dates: Vec<TraceDate> = dates.iter().filter(|d| covered.contains(d)).cloned().collect();

        tracing::debug!(
            %phase,
            algorithms = algorithms.len(),
            dates = dates.len(),
            gaps = gaps.len(),
            "phase aggregated"
        );

        Ok(Aggregation {
            document: CanonicalResultDocument {
                success: true,
                results,
                algorithms,
                dates,
                generated_at,
            },
            gaps,
        })
    }

    fn record_gap(
        &self,
        phase: PhaseId,
        gap: AggregationGap,
        gaps: &mut Vec<AggregationGap>,
    ) -> Result<(), AggregationError> {
        match self.policy {
            GapPolicy::Strict => Err(AggregationError::Gap {
                phase,
                algorithm: gap.algorithm,
                date: gap.date,
            }),
            GapPolicy::Skip => {
                tracing::warn!(
                    %phase,
                    algorithm = %gap.algorithm,
                    date = %gap.date,
                    reason = ?gap.reason,
                    "no metrics for date, leaving it out"
                );
                gaps.push(gap);
                Ok(())
            }
        }
    }
}

fn field_error(
    error: FieldError,
    phase: PhaseId,
    algorithm: &AlgorithmName,
    date: &TraceDate,
) -> AggregationError {
    match error {
        FieldError::Missing(field) => AggregationError::MissingField {
            phase,
            algorithm: algorithm.clone(),
            date: date.clone(),
            field,
        },
        FieldError::NonNumeric(field) => AggregationError::NonNumeric {
            phase,
            algorithm: algorithm.clone(),
            date: date.clone(),
            field,
        },
    }
}
