//! Pipeline declarations and the registered pipeline collection.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::GraphError;
use crate::graph::PhaseKind;
use crate::module::Module;

/// Per-pipeline selection rule applied when resolving which pipelines an
/// execution covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Resolves to `Manual` for deployment pipelines, `Normal` otherwise.
    #[default]
    Default,
    /// Executed on every run, whether or not it was requested.
    Always,
    /// Executed only when explicitly requested by name.
    Manual,
    /// Executed when the caller asks for normal pipelines.
    Normal,
}

impl ExecutionPolicy {
    /// Resolve `Default` against the pipeline's deployment flag.
    pub fn effective(self, deployment: bool) -> ExecutionPolicy {
        match self {
            ExecutionPolicy::Default if deployment => ExecutionPolicy::Manual,
            ExecutionPolicy::Default => ExecutionPolicy::Normal,
            other => other,
        }
    }
}

/// A named pipeline declaration: four ordered module lists (one per
/// [`PhaseKind`]), dependencies on other pipelines, and the flags that
/// shape its position in the phase graph.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    modules: [Vec<Arc<dyn Module>>; 4],
    dependencies: Vec<String>,
    isolated: bool,
    deployment: bool,
    policy: ExecutionPolicy,
}

impl Pipeline {
    /// Start building a pipeline with the given unique name.
    ///
    /// Names are compared case-insensitively when the pipeline is
    /// registered.
    pub fn named(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            pipeline: Pipeline {
                name: name.into(),
                modules: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
                dependencies: Vec::new(),
                isolated: false,
                deployment: false,
                policy: ExecutionPolicy::Default,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module chain of one phase.
    pub fn modules(&self, kind: PhaseKind) -> &[Arc<dyn Module>] {
        &self.modules[kind.index()]
    }

    /// Names of pipelines this pipeline depends on, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Isolated pipelines may have no dependencies and no pipeline may
    /// depend on them.
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// Deployment pipelines are gated behind all non-deployment pipelines'
    /// Output phases.
    pub fn is_deployment(&self) -> bool {
        self.deployment
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// The declared policy with `Default` resolved.
    pub fn effective_policy(&self) -> ExecutionPolicy {
        self.policy.effective(self.deployment)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "modules",
                &PhaseKind::ALL.map(|k| self.modules[k.index()].len()),
            )
            .field("dependencies", &self.dependencies)
            .field("isolated", &self.isolated)
            .field("deployment", &self.deployment)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Fluent builder returned by [`Pipeline::named`].
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    /// Append a module to the given phase.
    pub fn with_module(mut self, kind: PhaseKind, module: impl Module + 'static) -> Self {
        self.pipeline.modules[kind.index()].push(Arc::new(module));
        self
    }

    pub fn with_input(self, module: impl Module + 'static) -> Self {
        self.with_module(PhaseKind::Input, module)
    }

    pub fn with_process(self, module: impl Module + 'static) -> Self {
        self.with_module(PhaseKind::Process, module)
    }

    pub fn with_post_process(self, module: impl Module + 'static) -> Self {
        self.with_module(PhaseKind::PostProcess, module)
    }

    pub fn with_output(self, module: impl Module + 'static) -> Self {
        self.with_module(PhaseKind::Output, module)
    }

    /// Declare a dependency on another pipeline by name.
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.pipeline.dependencies.push(name.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipeline
            .dependencies
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.pipeline.isolated = isolated;
        self
    }

    pub fn deployment(mut self, deployment: bool) -> Self {
        self.pipeline.deployment = deployment;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.pipeline.policy = policy;
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

/// The registered pipelines, in insertion order, with case-insensitive
/// unique names.
///
/// Every mutation bumps a generation counter; the engine uses it to
/// invalidate its cached phase graph before the next execution.
#[derive(Clone, Default)]
pub struct PipelineCollection {
    pipelines: IndexMap<String, Arc<Pipeline>>,
    generation: u64,
}

impl PipelineCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline. Fails if a pipeline with the same name (any
    /// casing) is already present.
    pub fn add(&mut self, pipeline: Pipeline) -> Result<(), GraphError> {
        let key = pipeline.name().to_ascii_lowercase();
        if self.pipelines.contains_key(&key) {
            return Err(GraphError::DuplicatePipeline {
                name: pipeline.name().to_string(),
            });
        }
        self.pipelines.insert(key, Arc::new(pipeline));
        self.generation += 1;
        Ok(())
    }

    /// Remove a pipeline by name, preserving the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<Arc<Pipeline>> {
        let removed = self.pipelines.shift_remove(&name.to_ascii_lowercase());
        if removed.is_some() {
            self.generation += 1;
        }
        removed
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Pipelines in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.pipelines.values()
    }

    /// Declared names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.values().map(|p| p.name())
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for PipelineCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
