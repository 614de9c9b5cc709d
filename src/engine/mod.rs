//! The engine facade.
//!
//! An [`Engine`] owns the registered pipelines, settings, event bus, and
//! collaborator services. [`Engine::execute`] compiles (or reuses) the
//! phase graph, resolves the selected pipelines, schedules every selected
//! phase concurrently, and returns the aggregated outputs, raising a
//! single combined error when any phase failed or a failure-level log
//! record was captured.

pub mod context;
pub mod state;

mod executor;
mod summary;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::analysis::{Analyzer, parse_analyzer_specs};
use crate::config::{CleanMode, LogLevel, Settings};
use crate::engine::context::{AccessInfo, ExecutionInner};
use crate::engine::executor::{PhaseSignal, execute_graph, resolve_selection};
use crate::engine::state::{ExecutionOutputs, ExecutionState};
use crate::errors::{EngineError, ExecuteError, ExecutionFailure};
use crate::events::{AfterEngineExecution, BeforeEngineExecution, EventBus};
use crate::fs::{FileSystem, MemoryFileSystem, TrackedFileSystem};
use crate::graph::{PhaseGraph, PhaseKind, build_phase_graph};
use crate::logging::FailureTracker;
use crate::pipeline::{Pipeline, PipelineCollection};

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

/// The pipeline execution engine.
pub struct Engine {
    pipelines: PipelineCollection,
    settings: Arc<Settings>,
    events: Arc<EventBus>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    file_system: Arc<dyn FileSystem>,
    failure_tracker: Arc<FailureTracker>,
    serial: bool,
    executing: Mutex<Option<Uuid>>,
    disposed: AtomicBool,
    has_executed: AtomicBool,
    graph_cache: Mutex<Option<(u64, Arc<PhaseGraph>)>>,
    written: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The event registry; handlers may be attached between executions.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn pipelines(&self) -> &PipelineCollection {
        &self.pipelines
    }

    /// Mutable access to the registered pipelines. Any mutation
    /// invalidates the cached phase graph for the next execution.
    pub fn pipelines_mut(&mut self) -> &mut PipelineCollection {
        &mut self.pipelines
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The tracker a caller shares with their
    /// [`crate::logging::FailureLogLayer`] to arm log-based failures.
    pub fn failure_tracker(&self) -> &Arc<FailureTracker> {
        &self.failure_tracker
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.file_system
    }

    /// In serial mode each phase task is awaited before the next is
    /// scheduled; the dependency graph is still honored.
    pub fn set_serial(&mut self, serial: bool) {
        self.serial = serial;
    }

    pub fn is_serial(&self) -> bool {
        self.serial
    }

    /// Execute every Always- and Normal-policy pipeline.
    pub async fn execute_all(
        &self,
        token: CancellationToken,
    ) -> Result<ExecutionOutputs, EngineError> {
        self.execute(&[], true, token).await
    }

    /// Execute the named pipelines (plus Always-policy pipelines, plus
    /// Normal ones when `include_normal`, plus the transitive closure of
    /// dependencies).
    ///
    /// Only one execution per engine may be in flight; a concurrent call
    /// returns [`EngineError::AlreadyExecuting`].
    pub async fn execute(
        &self,
        pipelines: &[&str],
        include_normal: bool,
        token: CancellationToken,
    ) -> Result<ExecutionOutputs, EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Disposed);
        }
        let execution_id = Uuid::new_v4();
        {
            let mut executing = self.executing.lock();
            if executing.is_some() {
                return Err(EngineError::AlreadyExecuting);
            }
            *executing = Some(execution_id);
        }

        let result = self
            .execute_inner(execution_id, pipelines, include_normal, token)
            .instrument(tracing::info_span!("execution", id = %execution_id))
            .await;

        *self.executing.lock() = None;
        result
    }

    async fn execute_inner(
        &self,
        execution_id: Uuid,
        requested: &[&str],
        include_normal: bool,
        token: CancellationToken,
    ) -> Result<ExecutionOutputs, EngineError> {
        if self.pipelines.is_empty() {
            tracing::warn!("no pipelines are registered, nothing to execute");
            return Ok(ExecutionOutputs::default());
        }

        // Everything up to here is configuration validation; any error
        // leaves no partial state behind.
        let graph = self.phase_graph()?;
        let selected = Arc::new(resolve_selection(&self.pipelines, requested, include_normal)?);
        let analyzers = self.resolve_analyzers()?;
        self.clean_before_execution().await?;
        self.failure_tracker.arm(self.settings.failure_log_level);

        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for &id in graph.order() {
            if selected.contains(&graph.phase(id).pipeline().to_ascii_lowercase()) {
                let (tx, rx) = watch::channel(PhaseSignal::Pending);
                senders.insert(id, tx);
                receivers.insert(id, rx);
            }
        }
        let mut process_signals = HashMap::new();
        for name in selected.iter() {
            if let Some(id) = graph.phase_id(name, PhaseKind::Process) {
                process_signals.insert(name.clone(), receivers[&id].clone());
            }
        }

        let state = Arc::new(ExecutionState::new());
        let inner = Arc::new(ExecutionInner {
            execution_id,
            settings: Arc::clone(&self.settings),
            events: Arc::clone(&self.events),
            pipelines: self.pipelines.clone(),
            state: Arc::clone(&state),
            process_signals,
            access: self.access_map(),
            analyzers,
            fs: TrackedFileSystem::new(Arc::clone(&self.file_system), Arc::clone(&self.written)),
            token,
            serial: self.serial,
        });

        let mut before = BeforeEngineExecution { execution_id };
        if let Err(source) = self.events.before_engine_execution.raise(&mut before).await {
            self.failure_tracker.disarm();
            return Err(ExecuteError::EngineEvent {
                event: "BeforeEngineExecution",
                source,
            }
            .into());
        }

        tracing::info!(
            pipelines = selected.len(),
            serial = self.serial,
            "executing pipelines"
        );
        let errors = execute_graph(
            Arc::clone(&inner),
            Arc::clone(&graph),
            Arc::clone(&selected),
            self.serial,
            senders,
            receivers,
        )
        .await;

        let selected_in_order: Vec<&str> = self
            .pipelines
            .iter()
            .filter(|p| selected.contains(&p.name().to_ascii_lowercase()))
            .map(|p| p.name())
            .collect();
        let outputs = state.snapshot(selected_in_order.into_iter());

        // The summary and the After event run no matter how the phases
        // fared, cancellation included.
        let table = summary::render_table(&outputs);
        tracing::info!("execution summary:\n{table}");
        if let Some(timeline) = summary::render_timeline(&outputs) {
            tracing::info!("execution timeline:\n{timeline}");
        }

        let elapsed_ms = state.started.elapsed().as_millis() as u64;
        let mut after = AfterEngineExecution {
            execution_id,
            outputs: outputs.clone(),
            elapsed_ms,
        };
        if let Err(error) = self.events.after_engine_execution.raise(&mut after).await {
            tracing::warn!(%error, "AfterEngineExecution event handler failed");
        }

        self.log_analyzer_results(&outputs);

        let failure_logs = self.failure_tracker.disarm();
        if errors.is_empty() && failure_logs.is_empty() {
            Ok(outputs)
        } else {
            Err(Box::new(ExecutionFailure {
                execution_id,
                errors,
                failure_logs,
                outputs,
            })
            .into())
        }
    }

    /// Tear down the engine: clean per the configured mode and reject all
    /// further operations.
    pub async fn dispose(&mut self) -> Result<(), EngineError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Disposed);
        }
        let fs = &self.file_system;
        let cleanup: anyhow::Result<()> = async {
            match self.settings.clean_mode {
                CleanMode::Full => fs.clean_directory(fs.output_path()).await?,
                CleanMode::SelfClean => {
                    let written: Vec<PathBuf> = self.written.lock().drain().collect();
                    for path in written {
                        fs.delete_file(&path).await?;
                    }
                }
                CleanMode::None => {}
            }
            Ok(())
        }
        .await;
        cleanup.map_err(|source| EngineError::Execute(ExecuteError::FileSystem { source }))
    }

    /// The phase graph is built lazily and reused until the pipeline
    /// collection mutates.
    fn phase_graph(&self) -> Result<Arc<PhaseGraph>, EngineError> {
        let generation = self.pipelines.generation();
        let mut cache = self.graph_cache.lock();
        if let Some((cached_generation, graph)) = cache.as_ref()
            && *cached_generation == generation
        {
            return Ok(Arc::clone(graph));
        }
        let graph = Arc::new(build_phase_graph(&self.pipelines)?);
        *cache = Some((generation, Arc::clone(&graph)));
        Ok(graph)
    }

    fn resolve_analyzers(&self) -> Result<Vec<(Arc<dyn Analyzer>, LogLevel)>, ExecuteError> {
        let specs = parse_analyzer_specs(&self.settings.analyzers)?;
        let mut active: Vec<(Arc<dyn Analyzer>, LogLevel)> = self
            .analyzers
            .iter()
            .map(|a| (Arc::clone(a), a.default_level()))
            .collect();
        for spec in specs {
            if spec.name.eq_ignore_ascii_case("all") {
                if let Some(level) = spec.level {
                    for entry in &mut active {
                        entry.1 = level;
                    }
                }
                continue;
            }
            let Some(entry) = active
                .iter_mut()
                .find(|(a, _)| a.name().eq_ignore_ascii_case(&spec.name))
            else {
                return Err(ExecuteError::InvalidAnalyzerSpec {
                    entry: spec.name,
                    reason: "no analyzer registered under that name".into(),
                });
            };
            if let Some(level) = spec.level {
                entry.1 = level;
            }
        }
        active.retain(|(_, level)| *level != LogLevel::None);
        Ok(active)
    }

    /// Per-pipeline transitive dependency closure, lowercased, for the
    /// outputs access rules.
    fn access_map(&self) -> HashMap<String, AccessInfo> {
        let mut map = HashMap::new();
        for pipeline in self.pipelines.iter() {
            let mut closure = HashSet::new();
            let mut queue: Vec<String> = pipeline
                .dependencies()
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect();
            while let Some(name) = queue.pop() {
                if !closure.insert(name.clone()) {
                    continue;
                }
                if let Some(dependency) = self.pipelines.get(&name) {
                    queue.extend(
                        dependency
                            .dependencies()
                            .iter()
                            .map(|d| d.to_ascii_lowercase()),
                    );
                }
            }
            map.insert(pipeline.name().to_ascii_lowercase(), AccessInfo { closure });
        }
        map
    }

    async fn clean_before_execution(&self) -> Result<(), ExecuteError> {
        let fs = &self.file_system;
        let first = !self.has_executed.swap(true, Ordering::SeqCst);
        let result: anyhow::Result<()> = async {
            // The first execution always wipes the output directory,
            // whatever the configured mode.
            if first || self.settings.clean_mode == CleanMode::Full {
                fs.clean_directory(fs.output_path()).await?;
                self.written.lock().clear();
            } else if self.settings.clean_mode == CleanMode::SelfClean {
                let written: Vec<PathBuf> = self.written.lock().drain().collect();
                for path in written {
                    fs.delete_file(&path).await?;
                }
            }
            fs.clean_directory(fs.temp_path()).await?;
            Ok(())
        }
        .await;
        result.map_err(|source| ExecuteError::FileSystem { source })
    }

    fn log_analyzer_results(&self, outputs: &ExecutionOutputs) {
        for result in outputs.analyzer_results() {
            let text = format!(
                "[{}] {}/{}: {}",
                result.analyzer, result.pipeline, result.phase, result.message
            );
            match result.level {
                LogLevel::Error => tracing::error!("{text}"),
                LogLevel::Warning => tracing::warn!("{text}"),
                LogLevel::Information => tracing::info!("{text}"),
                LogLevel::Debug => tracing::debug!("{text}"),
                LogLevel::None => {}
            }
        }
    }
}

/// Explicit registration API for constructing an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    pipelines: Vec<Pipeline>,
    settings: Settings,
    analyzers: Vec<Arc<dyn Analyzer>>,
    file_system: Option<Arc<dyn FileSystem>>,
    failure_tracker: Option<Arc<FailureTracker>>,
    serial: bool,
}

impl EngineBuilder {
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl Analyzer + 'static) -> Self {
        self.analyzers.push(Arc::new(analyzer));
        self
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(file_system);
        self
    }

    /// Share a tracker with a [`crate::logging::FailureLogLayer`]
    /// installed on the caller's subscriber.
    pub fn with_failure_tracker(mut self, tracker: Arc<FailureTracker>) -> Self {
        self.failure_tracker = Some(tracker);
        self
    }

    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let mut pipelines = PipelineCollection::new();
        for pipeline in self.pipelines {
            pipelines.add(pipeline)?;
        }
        Ok(Engine {
            pipelines,
            settings: Arc::new(self.settings),
            events: Arc::new(EventBus::default()),
            analyzers: self.analyzers,
            file_system: self
                .file_system
                .unwrap_or_else(|| Arc::new(MemoryFileSystem::new())),
            failure_tracker: self.failure_tracker.unwrap_or_else(FailureTracker::new),
            serial: self.serial,
            executing: Mutex::new(None),
            disposed: AtomicBool::new(false),
            has_executed: AtomicBool::new(false),
            graph_cache: Mutex::new(None),
            written: Arc::new(Mutex::new(HashSet::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_duplicate_pipeline_names() {
        let result = Engine::builder()
            .with_pipeline(Pipeline::named("docs").build())
            .with_pipeline(Pipeline::named("DOCS").build())
            .build();
        assert!(matches!(
            result.unwrap_err(),
            EngineError::Graph(crate::errors::GraphError::DuplicatePipeline { .. })
        ));
    }

    #[tokio::test]
    async fn empty_collection_executes_to_empty_outputs() {
        let engine = Engine::builder().build().unwrap();
        let outputs = engine.execute_all(CancellationToken::new()).await.unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn disposed_engine_rejects_everything() {
        let mut engine = Engine::builder()
            .with_pipeline(Pipeline::named("a").build())
            .build()
            .unwrap();
        engine.dispose().await.unwrap();

        let err = engine
            .execute_all(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Disposed));

        let err = engine.dispose().await.unwrap_err();
        assert!(matches!(err, EngineError::Disposed));
    }

    #[tokio::test]
    async fn graph_cache_invalidates_on_collection_mutation() {
        let mut engine = Engine::builder()
            .with_pipeline(Pipeline::named("a").build())
            .build()
            .unwrap();

        let first = engine.phase_graph().unwrap();
        let again = engine.phase_graph().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        engine
            .pipelines_mut()
            .add(Pipeline::named("b").build())
            .unwrap();
        let rebuilt = engine.phase_graph().unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.len(), 8);
    }

    #[tokio::test]
    async fn unknown_analyzer_activation_is_rejected() {
        let engine = Engine::builder()
            .with_pipeline(Pipeline::named("a").build())
            .with_settings(Settings::default().with_analyzer("Ghost=warning"))
            .build()
            .unwrap();

        let err = engine
            .execute_all(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execute(ExecuteError::InvalidAnalyzerSpec { .. })
        ));
    }
}
