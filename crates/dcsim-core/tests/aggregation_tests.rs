//! Gap handling through the pipeline

use dcsim_core::aggregator::GapReason;
use dcsim_core::prelude::*;
use dcsim_test_utils::{dates, raw_from_json, test_config, StaticOrchestrator};
use pretty_assertions::assert_eq;
use serde_json::json;

fn phase4_with_gap() -> RawPhaseResults {
    raw_from_json(json!({
        "ACOPSOHybrid": {
            "20110303": {"metrics": {"balancedPercentage": 90, "totalMigrations": 3}},
            "20110306": {"systemState": "Overloaded"},
            "20110309": {"metrics": {"globalBestFitness": 0.5}}
        }
    }))
}

#[tokio::test]
async fn skip_policy_persists_incomplete_document() {
    let temp = tempfile::tempdir().unwrap();
    let configured = dates(&["20110303", "20110306", "20110309"]);
    let pipeline = PrecalculationPipeline::new(
        test_config(temp.path(), configured.clone()).with_gap_policy(GapPolicy::Skip),
    )
    .with_phase(PhaseId::Phase4, StaticOrchestrator::new(phase4_with_gap()));

    let report = pipeline.run_all().await;
    assert!(report.success);
    assert_eq!(report.gap_count(), 1);
    let gap = &report.phases[0].gaps[0];
    assert_eq!(gap.date.as_str(), "20110306");
    assert_eq!(gap.reason, GapReason::MissingMetrics);

    let doc = pipeline.store().load(PhaseId::Phase4).await.unwrap();
    assert_eq!(doc.dates, dates(&["20110303", "20110309"]));
    assert_eq!(doc.missing_dates(&configured), dates(&["20110306"]));
    assert!(!doc.is_complete(&configured));
    // absent fields read as zero
    assert_eq!(doc.value("loadVariance", "ACOPSOHybrid", "20110303"), Some(0.0));
    assert_eq!(doc.value("fitnessScore", "ACOPSOHybrid", "20110309"), Some(0.5));
    assert_eq!(doc.value("fitnessScore", "ACOPSOHybrid", "20110306"), None);
}

#[tokio::test]
async fn strict_policy_fails_phase_and_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let configured = dates(&["20110303", "20110306", "20110309"]);
    let pipeline = PrecalculationPipeline::new(
        test_config(temp.path(), configured).with_gap_policy(GapPolicy::Strict),
    )
    .with_phase(PhaseId::Phase4, StaticOrchestrator::new(phase4_with_gap()));

    let report = pipeline.run_all().await;
    assert!(!report.success);
    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::AggregationGap);
    assert!(matches!(
        failure.error,
        PhaseError::Aggregation(AggregationError::Gap { phase: PhaseId::Phase4, .. })
    ));
    assert!(!pipeline.store().exists(PhaseId::Phase4).await);
}

#[tokio::test]
async fn missing_date_in_multi_algorithm_phase_is_a_gap() {
    let temp = tempfile::tempdir().unwrap();
    let configured = dates(&["20110303", "20110306"]);
    let raw = raw_from_json(json!({
        "PACO": {
            "20110303": {"avgPredictedLoad": 0.5, "avgPheromoneLevel": 1.0, "avgLoadVariance": 0.1,
                "avgMigrationCount": 4, "avgConsolidationEfficiency": 0.9}
        }
    }));
    let pipeline = PrecalculationPipeline::new(test_config(temp.path(), configured))
        .with_phase(PhaseId::Phase2, StaticOrchestrator::new(raw));

    let report = pipeline.run_all().await;
    assert!(report.success);
    assert_eq!(report.phases[0].gaps[0].reason, GapReason::MissingDate);

    let doc = pipeline.store().load(PhaseId::Phase2).await.unwrap();
    assert_eq!(doc.value("averageMigrationCount", "PACO", "20110303"), Some(4.0));
    assert_eq!(doc.dates, dates(&["20110303"]));
}

#[tokio::test]
async fn malformed_copy_field_is_aggregation_failure() {
    let temp = tempfile::tempdir().unwrap();
    let raw = raw_from_json(json!({
        "LrMmt": {"20110303": {"energyConsumption": "lots", "vmMigrations": 1, "slaViolations": 0,
            "nodeShutdowns": 1, "meanTimeBeforeShutdown": 1, "meanTimeBeforeMigration": 1}}
    }));
    let report = PrecalculationPipeline::new(test_config(temp.path(), dates(&["20110303"])))
        .with_phase(PhaseId::Phase1, StaticOrchestrator::new(raw))
        .run_all()
        .await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Aggregation);
    assert!(matches!(
        failure.error,
        PhaseError::Aggregation(AggregationError::NonNumeric { field: "energyConsumption", .. })
    ));
}

#[tokio::test]
async fn empty_phase1_result_follows_gap_policy() {
    let temp = tempfile::tempdir().unwrap();
    let configured = dates(&["20110303", "20110306"]);

    let strict = PrecalculationPipeline::new(
        test_config(temp.path(), configured.clone()).with_gap_policy(GapPolicy::Strict),
    )
    .with_phase(PhaseId::Phase1, StaticOrchestrator::new(raw_from_json(json!({}))));
    let report = strict.run_all().await;
    assert!(!report.success);
    assert_eq!(report.failure.unwrap().kind, ErrorKind::AggregationGap);
    assert!(!strict.store().exists(PhaseId::Phase1).await);

    let skip = PrecalculationPipeline::new(
        test_config(temp.path(), configured).with_gap_policy(GapPolicy::Skip),
    )
    .with_phase(PhaseId::Phase1, StaticOrchestrator::new(raw_from_json(json!({}))));
    let report = skip.run_all().await;
    assert!(report.success);
    assert_eq!(report.gap_count(), 2);
    assert!(report.phases[0].gaps.iter().all(|g| g.reason == GapReason::NoAlgorithms));
}
