//! Per-module execution context.
//!
//! Each module invocation receives an [`ExecutionContext`]: the current
//! inputs batch, the owning pipeline and phase, engine-wide services, the
//! cancellation token, and helpers for nested module chains and prior
//! pipelines' outputs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::Analyzer;
use crate::config::{LogLevel, Settings};
use crate::documents::{Batch, ContentProvider, StringContent};
use crate::engine::executor::{self, PhaseSignal};
use crate::engine::state::ExecutionState;
use crate::events::EventBus;
use crate::fs::{FileSystem, FileSystemContent, TrackedFileSystem};
use crate::graph::PhaseKind;
use crate::module::Module;
use crate::pipeline::PipelineCollection;

/// Which other pipelines a pipeline may read outputs from without an
/// explicit graph edge.
pub(crate) struct AccessInfo {
    /// Lowercased names of the transitive dependency closure.
    pub(crate) closure: HashSet<String>,
}

/// Immutable engine-wide view shared by every context of one execution.
pub(crate) struct ExecutionInner {
    pub(crate) execution_id: Uuid,
    pub(crate) settings: Arc<Settings>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) pipelines: PipelineCollection,
    pub(crate) state: Arc<ExecutionState>,
    /// Process-phase completion signals of every selected pipeline,
    /// keyed by lowercased name.
    pub(crate) process_signals: HashMap<String, watch::Receiver<PhaseSignal>>,
    pub(crate) access: HashMap<String, AccessInfo>,
    pub(crate) analyzers: Vec<(Arc<dyn Analyzer>, LogLevel)>,
    pub(crate) fs: TrackedFileSystem,
    pub(crate) token: CancellationToken,
    pub(crate) serial: bool,
}

/// The view a module gets of the engine while executing.
pub struct ExecutionContext {
    inner: Arc<ExecutionInner>,
    pipeline: Arc<str>,
    phase: PhaseKind,
    inputs: Batch,
}

impl ExecutionContext {
    pub(crate) fn new(
        inner: Arc<ExecutionInner>,
        pipeline: Arc<str>,
        phase: PhaseKind,
        inputs: Batch,
    ) -> Self {
        Self { inner, pipeline, phase, inputs }
    }

    /// The batch produced by the previous module in the chain (or the
    /// phase's inputs for the first module).
    pub fn inputs(&self) -> &Batch {
        &self.inputs
    }

    /// Name of the executing pipeline.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        self.inner.fs.inner()
    }

    /// Cooperative cancellation signal for this execution. Modules should
    /// observe it across long waits.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Write a file under the output directory, tracking it for
    /// `CleanMode::SelfClean` and disposal.
    pub async fn write_output(&self, relative: &Path, contents: &[u8]) -> anyhow::Result<()> {
        self.inner.fs.write_output(relative, contents).await
    }

    /// Outputs of prior pipelines' Process phases.
    pub fn outputs(&self) -> PipelineOutputs {
        PipelineOutputs {
            inner: Arc::clone(&self.inner),
            pipeline: Arc::clone(&self.pipeline),
            phase: self.phase,
        }
    }

    /// Turn a string into a content provider, honoring the
    /// `use_string_content_files` setting: either memory-backed or
    /// written to a temp file.
    pub async fn content_from_string(
        &self,
        content: impl Into<String>,
    ) -> anyhow::Result<Arc<dyn ContentProvider>> {
        let content = content.into();
        if !self.inner.settings.use_string_content_files {
            return Ok(Arc::new(StringContent(content)));
        }
        let name = PathBuf::from(format!("{}.content", Uuid::new_v4()));
        let path = self.inner.fs.write_temp(&name, content.as_bytes()).await?;
        Ok(Arc::new(FileSystemContent::new(
            Arc::clone(self.inner.fs.inner()),
            path,
        )))
    }

    /// Run a module sub-sequence against an arbitrary batch, with the
    /// same event and cancellation discipline as the enclosing phase.
    /// Used by container modules that run a nested chain per input.
    pub async fn execute_modules(
        &self,
        modules: &[Arc<dyn Module>],
        inputs: Batch,
    ) -> anyhow::Result<Batch> {
        executor::run_module_chain(&self.inner, &self.pipeline, self.phase, modules, inputs)
            .await
            .map_err(anyhow::Error::new)
    }
}

/// Dependency-aware view of other pipelines' Process-phase outputs.
///
/// `get` awaits the producing phase's completion signal, so reads are
/// deterministic; access is restricted to pipelines the phase graph
/// guarantees cannot produce a wait cycle.
pub struct PipelineOutputs {
    inner: Arc<ExecutionInner>,
    pipeline: Arc<str>,
    phase: PhaseKind,
}

impl PipelineOutputs {
    /// The Process-phase outputs of `name`, awaiting that phase's
    /// completion first.
    pub async fn get(&self, name: &str) -> anyhow::Result<Batch> {
        let key = name.to_ascii_lowercase();
        let own_key = self.pipeline.to_ascii_lowercase();

        let Some(target) = self.inner.pipelines.get(name) else {
            bail!("unknown pipeline '{name}'");
        };
        let Some(own) = self.inner.pipelines.get(&self.pipeline) else {
            bail!("unknown pipeline '{}'", self.pipeline);
        };
        if key == own_key && matches!(self.phase, PhaseKind::Input | PhaseKind::Process) {
            bail!(
                "the {} phase of pipeline '{}' cannot read its own process outputs",
                self.phase,
                self.pipeline
            );
        }
        if own.is_isolated() {
            bail!(
                "isolated pipeline '{}' cannot access other pipelines' outputs",
                self.pipeline
            );
        }
        if target.is_isolated() {
            bail!("outputs of isolated pipeline '{name}' are not accessible");
        }

        let allowed = key == own_key
            || self.inner.access.get(&own_key).is_some_and(|a| a.closure.contains(&key))
            || (own.is_deployment() && !target.is_deployment())
            || (matches!(self.phase, PhaseKind::PostProcess | PhaseKind::Output)
                && target.is_deployment() == own.is_deployment());
        if !allowed {
            bail!(
                "the {} phase of pipeline '{}' cannot access outputs of pipeline '{}': \
                 it is neither a dependency nor ordered before this phase",
                self.phase,
                self.pipeline,
                name
            );
        }

        let Some(signal) = self.inner.process_signals.get(&key) else {
            bail!("pipeline '{name}' was not executed in this run");
        };
        let mut signal = signal.clone();
        // Serial mode awaits phase tasks one at a time, so waiting here
        // could park forever on a producer that has not been scheduled
        // yet; read the current state instead.
        let completed = if self.inner.serial {
            Ok(*signal.borrow())
        } else {
            signal
                .wait_for(|s| *s != PhaseSignal::Pending)
                .await
                .map(|s| *s)
        };
        match completed {
            Ok(PhaseSignal::Succeeded) => {}
            _ => bail!("pipeline '{name}' did not complete its process phase successfully"),
        }

        Ok(self
            .inner
            .state
            .phase_outputs(target.name(), PhaseKind::Process)
            .unwrap_or_default())
    }
}
