//! Testing utilities for the DCSim workspace
//!
//! Shared fakes for the phase and network collaborators, plus raw result
//! fixtures shaped like each phase's orchestrator output.

#![allow(missing_docs)]

use async_trait::async_trait;
use bytes::Bytes;
use dcsim_artifact::{ArchiveTransport, ByteSource, TransportError};
use dcsim_core::config::PipelineConfig;
use dcsim_core::runner::PhaseOrchestrator;
use dcsim_core::{CollaboratorError, RawPhaseResults, TraceDate};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Smallest byte prefix the validator accepts as an archive
pub const ARCHIVE_BYTES: &[u8] = b"PK\x03\x04planetlab-traces";

/// What a link-sharing host serves instead of a large file
pub const HTML_INTERSTITIAL: &[u8] =
    b"<!DOCTYPE html><html><head><title>Virus scan warning</title></head><body>confirm</body></html>";

pub fn dates(values: &[&str]) -> Vec<TraceDate> {
    values.iter().map(|d| TraceDate::parse(*d).unwrap()).collect()
}

pub fn two_dates() -> Vec<TraceDate> {
    dates(&["20110303", "20110306"])
}

pub fn test_config(output_dir: &Path, dates: Vec<TraceDate>) -> PipelineConfig {
    PipelineConfig::new().with_dates(dates).with_output_dir(output_dir)
}

pub fn raw_from_json(value: Value) -> RawPhaseResults {
    serde_json::from_value(value).unwrap()
}

/// Phase 1 output: top-level metric fields per algorithm and date
pub fn phase1_raw(algorithms: &[&str], dates: &[TraceDate]) -> RawPhaseResults {
    let mut root = serde_json::Map::new();
    for (a, algorithm) in algorithms.iter().enumerate() {
        let mut by_date = serde_json::Map::new();
        for (d, date) in dates.iter().enumerate() {
            let seed = (a * 10 + d) as f64;
            by_date.insert(
                date.to_string(),
                json!({
                    "energyConsumption": 100.0 + seed,
                    "vmMigrations": 50.0 + seed,
                    "slaViolations": 0.01 * (seed + 1.0),
                    "nodeShutdowns": 10.0 + seed,
                    "meanTimeBeforeShutdown": 600.5 + seed,
                    "meanTimeBeforeMigration": 20.25 + seed
                }),
            );
        }
        root.insert((*algorithm).to_string(), Value::Object(by_date));
    }
    raw_from_json(Value::Object(root))
}

/// Phase 2 output: `avg*` fields per algorithm and date
pub fn phase2_raw(algorithms: &[&str], dates: &[TraceDate]) -> RawPhaseResults {
    let mut root = serde_json::Map::new();
    for algorithm in algorithms {
        let mut by_date = serde_json::Map::new();
        for date in dates {
            by_date.insert(
                date.to_string(),
                json!({
                    "avgPredictedLoad": 0.62,
                    "avgPheromoneLevel": 1.4,
                    "avgLoadVariance": 0.08,
                    "avgMigrationCount": 12.0,
                    "avgConsolidationEfficiency": 0.87
                }),
            );
        }
        root.insert((*algorithm).to_string(), Value::Object(by_date));
    }
    raw_from_json(Value::Object(root))
}

/// Phase 3 output for `TVPLCVPSOLB`
pub fn phase3_raw(dates: &[TraceDate]) -> RawPhaseResults {
    let by_date: serde_json::Map<String, Value> = dates
        .iter()
        .map(|date| {
            (
                date.to_string(),
                json!({
                    "metrics": {
                        "totalVMs": 10,
                        "loadedVMs": 7,
                        "totalMigrations": 4,
                        "balancedPercentage": 70,
                        "loadPercentage": 55
                    },
                    "systemState": "Balanced"
                }),
            )
        })
        .collect();
    raw_from_json(json!({ "TVPLCVPSOLB": by_date }))
}

/// Phase 4 output for `ACOPSOHybrid`
pub fn phase4_raw(dates: &[TraceDate]) -> RawPhaseResults {
    let by_date: serde_json::Map<String, Value> = dates
        .iter()
        .map(|date| {
            (
                date.to_string(),
                json!({
                    "metrics": {
                        "balancedPercentage": 90,
                        "averageUtilization": 60,
                        "loadVariance": 5,
                        "totalMigrations": 3,
                        "globalBestFitness": 0.92
                    }
                }),
            )
        })
        .collect();
    raw_from_json(json!({ "ACOPSOHybrid": by_date }))
}

/// Returns the same raw results on every call and records what it was asked
#[derive(Debug, Default)]
pub struct StaticOrchestrator {
    results: RawPhaseResults,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<TraceDate>>>,
}

impl StaticOrchestrator {
    pub fn new(results: RawPhaseResults) -> Arc<Self> {
        Arc::new(Self {
            results,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Date lists received, one entry per call
    pub fn requests(&self) -> Vec<Vec<TraceDate>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhaseOrchestrator for StaticOrchestrator {
    async fn run(&self, dates: &[TraceDate]) -> Result<RawPhaseResults, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(dates.to_vec());
        Ok(self.results.clone())
    }
}

/// Always fails
#[derive(Debug, Default)]
pub struct FailingOrchestrator {
    message: String,
    calls: AtomicUsize,
}

impl FailingOrchestrator {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhaseOrchestrator for FailingOrchestrator {
    async fn run(&self, _dates: &[TraceDate]) -> Result<RawPhaseResults, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Failed(self.message.clone()))
    }
}

/// Serves a fixed body in chunks
#[derive(Debug)]
pub struct MemoryTransport {
    body: Vec<Bytes>,
    opened: AtomicUsize,
}

impl MemoryTransport {
    /// Serve `body` split into `chunk_size` pieces
    pub fn new(body: &[u8], chunk_size: usize) -> Arc<Self> {
        let body = body
            .chunks(chunk_size.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        Arc::new(Self {
            body,
            opened: AtomicUsize::new(0),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveTransport for MemoryTransport {
    async fn open(&self, _url: &str) -> Result<Box<dyn ByteSource>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySource {
            chunks: self.body.clone().into_iter(),
        }))
    }
}

struct MemorySource {
    chunks: std::vec::IntoIter<Bytes>,
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.chunks.next())
    }
}

/// Sends a prefix, then the connection drops
#[derive(Debug)]
pub struct BrokenTransport {
    prefix: Bytes,
    opened: AtomicUsize,
}

impl BrokenTransport {
    pub fn new(prefix: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            prefix: Bytes::copy_from_slice(prefix),
            opened: AtomicUsize::new(0),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveTransport for BrokenTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteSource>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BrokenSource {
            url: url.to_string(),
            prefix: Some(self.prefix.clone()),
        }))
    }
}

struct BrokenSource {
    url: String,
    prefix: Option<Bytes>,
}

#[async_trait]
impl ByteSource for BrokenSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.prefix.take() {
            Some(chunk) => Ok(Some(chunk)),
            None => Err(TransportError::Body {
                url: self.url.clone(),
                message: "connection reset by peer".to_string(),
            }),
        }
    }
}

/// Fails to connect
#[derive(Debug, Default)]
pub struct UnreachableTransport;

#[async_trait]
impl ArchiveTransport for UnreachableTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteSource>, TransportError> {
        Err(TransportError::Request {
            url: url.to_string(),
            message: "connection refused".to_string(),
        })
    }
}
