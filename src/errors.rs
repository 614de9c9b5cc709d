//! Typed error hierarchy for the engine.
//!
//! Three layers cover the taxonomy:
//! - `GraphError` — configuration errors caught while compiling the phase
//!   graph, before any phase runs
//! - `ExecuteError` — failures of a single phase, module, or collaborator
//!   during execution
//! - `EngineError` — the facade-level umbrella, including the aggregated
//!   [`ExecutionFailure`] raised after a run that recorded failures

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::engine::state::ExecutionOutputs;
use crate::graph::PhaseKind;

/// Configuration errors detected while building the phase graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("pipeline '{pipeline}' depends on unknown pipeline '{dependency}'")]
    MissingDependency { pipeline: String, dependency: String },

    #[error("isolated pipeline '{pipeline}' cannot declare dependencies")]
    IsolatedDependencies { pipeline: String },

    #[error("pipeline '{pipeline}' cannot depend on isolated pipeline '{dependency}'")]
    DependencyOnIsolated { pipeline: String, dependency: String },

    #[error(
        "non-deployment pipeline '{pipeline}' cannot depend on deployment pipeline '{dependency}'"
    )]
    DependencyOnDeployment { pipeline: String, dependency: String },

    #[error("cyclic dependency detected at pipeline '{pipeline}'")]
    CyclicDependency { pipeline: String },

    #[error("a pipeline named '{name}' is already registered")]
    DuplicatePipeline { name: String },
}

/// Failures raised during an execution.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("unknown pipeline '{name}'")]
    UnknownPipeline { name: String },

    #[error("invalid analyzer setting '{entry}': {reason}")]
    InvalidAnalyzerSpec { entry: String, reason: String },

    #[error("module '{module}' failed in the {phase} phase of pipeline '{pipeline}'")]
    Module {
        pipeline: String,
        phase: PhaseKind,
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "the {phase} phase of pipeline '{pipeline}' was skipped because a dependency did not \
         complete successfully"
    )]
    Skipped { pipeline: String, phase: PhaseKind },

    #[error("execution was cancelled in the {phase} phase of pipeline '{pipeline}'")]
    Cancelled { pipeline: String, phase: PhaseKind },

    #[error("the {phase} phase of pipeline '{pipeline}' panicked")]
    PhasePanicked { pipeline: String, phase: PhaseKind },

    #[error("BeforeDeployment event handler failed")]
    DeploymentGate {
        #[source]
        source: anyhow::Error,
    },

    #[error("{event} event handler failed")]
    EngineEvent {
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("file system operation failed")]
    FileSystem {
        #[source]
        source: anyhow::Error,
    },
}

/// Aggregate failure of one execution.
///
/// Carries every root phase failure, any log records captured at or above
/// the configured failure level, and the outputs map populated with
/// whatever did succeed.
#[derive(Debug)]
pub struct ExecutionFailure {
    pub execution_id: Uuid,
    pub errors: Vec<ExecuteError>,
    pub failure_logs: Vec<String>,
    pub outputs: ExecutionOutputs,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "execution {} finished with {} phase failure(s) and {} logged failure(s)",
            self.execution_id,
            self.errors.len(),
            self.failure_logs.len()
        )
    }
}

impl std::error::Error for ExecutionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Facade-level errors returned by [`crate::engine::Engine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    Failed(#[from] Box<ExecutionFailure>),

    #[error("an execution is already in progress")]
    AlreadyExecuting,

    #[error("the engine has been disposed")]
    Disposed,
}
