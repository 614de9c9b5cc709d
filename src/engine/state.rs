//! Per-execution result state.
//!
//! Phase tasks write [`PhaseResult`]s into a concurrent map as they
//! complete; the summary renderer, downstream module contexts, and the
//! caller read the assembled [`ExecutionOutputs`] afterwards.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::analysis::AnalyzerResult;
use crate::documents::Batch;
use crate::graph::PhaseKind;

/// Result of one successful phase execution. Absent on skip or failure.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    kind: PhaseKind,
    outputs: Batch,
    started_at: DateTime<Utc>,
    started: Instant,
    elapsed: Duration,
}

impl PhaseResult {
    pub(crate) fn new(
        kind: PhaseKind,
        outputs: Batch,
        started_at: DateTime<Utc>,
        started: Instant,
        elapsed: Duration,
    ) -> Self {
        Self { kind, outputs, started_at, started, elapsed }
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn outputs(&self) -> &Batch {
        &self.outputs
    }

    /// Wall-clock start timestamp.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Monotonic start instant, for ordering assertions and the timeline.
    pub fn start_instant(&self) -> Instant {
        self.started
    }

    pub fn end_instant(&self) -> Instant {
        self.started + self.elapsed
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// The four phase-result slots of one pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineResults {
    slots: [Option<PhaseResult>; 4],
}

impl PipelineResults {
    pub fn get(&self, kind: PhaseKind) -> Option<&PhaseResult> {
        self.slots[kind.index()].as_ref()
    }

    pub(crate) fn set(&mut self, result: PhaseResult) {
        let index = result.kind().index();
        self.slots[index] = Some(result);
    }

    /// The pipeline's final outputs: the Output phase's batch.
    pub fn output(&self) -> Option<&Batch> {
        self.get(PhaseKind::Output).map(PhaseResult::outputs)
    }

    /// Present results in phase order.
    pub fn iter(&self) -> impl Iterator<Item = &PhaseResult> {
        self.slots.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Everything one execution produced: per-pipeline phase results in
/// pipeline declaration order, plus collected analyzer results.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutputs {
    pipelines: IndexMap<String, PipelineResults>,
    analyzer_results: Vec<AnalyzerResult>,
}

impl ExecutionOutputs {
    /// Case-insensitive lookup by pipeline name.
    pub fn get(&self, name: &str) -> Option<&PipelineResults> {
        self.pipelines
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, results)| results)
    }

    /// Pipelines in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PipelineResults)> {
        self.pipelines.iter().map(|(name, r)| (name.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn analyzer_results(&self) -> &[AnalyzerResult] {
        &self.analyzer_results
    }

    pub(crate) fn insert(&mut self, name: String, results: PipelineResults) {
        self.pipelines.insert(name, results);
    }

    pub(crate) fn set_analyzer_results(&mut self, results: Vec<AnalyzerResult>) {
        self.analyzer_results = results;
    }
}

/// Shared mutable state of one in-flight execution.
pub(crate) struct ExecutionState {
    pub(crate) started: Instant,
    results: DashMap<String, PipelineResults>,
    analyzer_results: Mutex<Vec<AnalyzerResult>>,
}

impl ExecutionState {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            results: DashMap::new(),
            analyzer_results: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record_phase(&self, pipeline: &str, result: PhaseResult) {
        self.results
            .entry(pipeline.to_string())
            .or_default()
            .set(result);
    }

    pub(crate) fn phase_outputs(&self, pipeline: &str, kind: PhaseKind) -> Option<Batch> {
        self.results
            .get(pipeline)
            .and_then(|r| r.get(kind).map(|p| p.outputs().clone()))
    }

    pub(crate) fn add_analyzer_results(&self, results: Vec<AnalyzerResult>) {
        if !results.is_empty() {
            self.analyzer_results.lock().extend(results);
        }
    }

    /// Assemble the outputs map: one entry per selected pipeline in
    /// declaration order, empty slots for phases that never completed.
    pub(crate) fn snapshot<'a>(
        &self,
        selected_in_order: impl Iterator<Item = &'a str>,
    ) -> ExecutionOutputs {
        let mut outputs = ExecutionOutputs::default();
        for name in selected_in_order {
            let results = self
                .results
                .get(name)
                .map(|r| r.value().clone())
                .unwrap_or_default();
            outputs.insert(name.to_string(), results);
        }
        outputs.set_analyzer_results(self.analyzer_results.lock().clone());
        outputs
    }
}
