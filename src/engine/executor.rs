//! Phase scheduling and execution.
//!
//! Every selected phase becomes one tokio task, created eagerly in
//! dependency-sorted order. Completion is broadcast through a watch
//! channel per phase; a task first awaits the terminal signal of each of
//! its selected dependencies and skips itself when any of them did not
//! succeed, which is the only failure-propagation mechanism. A synthetic
//! gate task raises `BeforeDeployment` once all non-deployment phases have
//! drained, and every deployment pipeline's Input waits on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analysis::{AnalyzerContext, AnalyzerResult};
use crate::documents::Batch;
use crate::engine::context::{ExecutionContext, ExecutionInner};
use crate::engine::state::PhaseResult;
use crate::errors::ExecuteError;
use crate::events::{AfterModuleExecution, BeforeDeployment, BeforeModuleExecution};
use crate::graph::{PhaseGraph, PhaseId, PhaseKind};
use crate::module::Module;
use crate::pipeline::{ExecutionPolicy, PipelineCollection};

/// Terminal-state broadcast of one phase task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum PhaseSignal {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

/// Resolve which pipelines an execution covers: Always-policy pipelines,
/// Normal ones when requested, the explicitly named ones, plus the
/// transitive closure of their dependencies. Returns lowercased names.
pub(crate) fn resolve_selection(
    pipelines: &PipelineCollection,
    requested: &[&str],
    include_normal: bool,
) -> Result<HashSet<String>, ExecuteError> {
    let mut selected = HashSet::new();
    for pipeline in pipelines.iter() {
        match pipeline.effective_policy() {
            ExecutionPolicy::Always => {
                selected.insert(pipeline.name().to_ascii_lowercase());
            }
            ExecutionPolicy::Normal if include_normal => {
                selected.insert(pipeline.name().to_ascii_lowercase());
            }
            _ => {}
        }
    }
    for name in requested {
        let Some(pipeline) = pipelines.get(name) else {
            return Err(ExecuteError::UnknownPipeline { name: name.to_string() });
        };
        selected.insert(pipeline.name().to_ascii_lowercase());
    }

    let mut queue: Vec<String> = selected.iter().cloned().collect();
    while let Some(name) = queue.pop() {
        let Some(pipeline) = pipelines.get(&name) else { continue };
        for dependency in pipeline.dependencies() {
            let key = dependency.to_ascii_lowercase();
            if selected.insert(key.clone()) {
                queue.push(key);
            }
        }
    }
    Ok(selected)
}

/// Drive every selected phase of the graph to completion and return the
/// root failures (module errors, cancellations, gate failures). Skipped
/// phases are not reported; their empty result slots tell the story.
pub(crate) async fn execute_graph(
    inner: Arc<ExecutionInner>,
    graph: Arc<PhaseGraph>,
    selected: Arc<HashSet<String>>,
    serial: bool,
    mut senders: HashMap<PhaseId, watch::Sender<PhaseSignal>>,
    receivers: HashMap<PhaseId, watch::Receiver<PhaseSignal>>,
) -> Vec<ExecuteError> {
    let mut errors = Vec::new();

    let is_selected = |id: &PhaseId| {
        selected.contains(&graph.phase(*id).pipeline().to_ascii_lowercase())
    };
    let is_deployment = |id: PhaseId| {
        inner
            .pipelines
            .get(graph.phase(id).pipeline())
            .is_some_and(|p| p.is_deployment())
    };

    // The deployment gate waits for every selected non-deployment phase;
    // with no deployment pipelines in the run it waits for everything and
    // still fires, for observability.
    let any_deployment = graph
        .order()
        .iter()
        .any(|&id| is_selected(&id) && is_deployment(id));
    let gate_wait: Vec<watch::Receiver<PhaseSignal>> = graph
        .order()
        .iter()
        .filter(|&&id| is_selected(&id) && (!any_deployment || !is_deployment(id)))
        .filter_map(|id| receivers.get(id).cloned())
        .collect();
    let (gate_tx, gate_rx) = watch::channel(PhaseSignal::Pending);
    let gate_inner = Arc::clone(&inner);
    let gate: JoinHandle<Option<ExecuteError>> = tokio::spawn(async move {
        for mut rx in gate_wait {
            let _ = rx.wait_for(|s| *s != PhaseSignal::Pending).await;
        }
        let mut args = BeforeDeployment { execution_id: gate_inner.execution_id };
        match gate_inner.events.before_deployment.raise(&mut args).await {
            Ok(_) => {
                let _ = gate_tx.send(PhaseSignal::Succeeded);
                None
            }
            Err(source) => {
                tracing::error!(error = %source, "BeforeDeployment event handler failed");
                let _ = gate_tx.send(PhaseSignal::Failed);
                Some(ExecuteError::DeploymentGate { source })
            }
        }
    });

    let mut handles: Vec<(String, PhaseKind, JoinHandle<Option<ExecuteError>>)> = Vec::new();
    for &id in graph.order() {
        if !is_selected(&id) {
            continue;
        }
        let Some(tx) = senders.remove(&id) else { continue };
        let phase = graph.phase(id);
        let pipeline_name = phase.pipeline().to_string();
        let kind = phase.kind();

        let dependency_rxs: Vec<watch::Receiver<PhaseSignal>> = phase
            .dependencies()
            .iter()
            .filter_map(|dep| receivers.get(dep).cloned())
            .collect();
        let gate_dep =
            (kind == PhaseKind::Input && is_deployment(id)).then(|| gate_rx.clone());

        let task_inner = Arc::clone(&inner);
        let task_graph = Arc::clone(&graph);
        let handle = tokio::spawn(async move {
            let mut ready = true;
            for mut rx in dependency_rxs {
                match rx.wait_for(|s| *s != PhaseSignal::Pending).await {
                    Ok(signal) if *signal == PhaseSignal::Succeeded => {}
                    _ => ready = false,
                }
            }
            if let Some(mut rx) = gate_dep {
                match rx.wait_for(|s| *s != PhaseSignal::Pending).await {
                    Ok(signal) if *signal == PhaseSignal::Succeeded => {}
                    _ => ready = false,
                }
            }
            let phase = task_graph.phase(id);
            if !ready {
                tracing::debug!(
                    pipeline = phase.pipeline(),
                    phase = %phase.kind(),
                    "phase skipped because a dependency did not complete successfully"
                );
                let _ = tx.send(PhaseSignal::Failed);
                return None;
            }
            match run_phase(&task_inner, &task_graph, id).await {
                Ok(()) => {
                    let _ = tx.send(PhaseSignal::Succeeded);
                    None
                }
                Err(error) => {
                    tracing::error!(
                        pipeline = phase.pipeline(),
                        phase = %phase.kind(),
                        error = ?error,
                        "phase failed"
                    );
                    let _ = tx.send(PhaseSignal::Failed);
                    Some(error)
                }
            }
        });

        if serial {
            collect(handle.await, pipeline_name, kind, &mut errors);
        } else {
            handles.push((pipeline_name, kind, handle));
        }
    }

    for (pipeline, kind, handle) in handles {
        collect(handle.await, pipeline, kind, &mut errors);
    }
    match gate.await {
        Ok(Some(error)) => errors.push(error),
        Ok(None) => {}
        Err(_) => errors.push(ExecuteError::DeploymentGate {
            source: anyhow::anyhow!("deployment gate task panicked"),
        }),
    }
    errors
}

fn collect(
    joined: Result<Option<ExecuteError>, tokio::task::JoinError>,
    pipeline: String,
    phase: PhaseKind,
    errors: &mut Vec<ExecuteError>,
) {
    match joined {
        Ok(Some(error)) => errors.push(error),
        Ok(None) => {}
        Err(_) => errors.push(ExecuteError::PhasePanicked { pipeline, phase }),
    }
}

/// Execute one phase: gather the intra-pipeline predecessor's outputs,
/// run the module chain, run keyed analyzers (even on failure), and store
/// the phase result on success.
async fn run_phase(
    inner: &Arc<ExecutionInner>,
    graph: &Arc<PhaseGraph>,
    id: PhaseId,
) -> Result<(), ExecuteError> {
    let phase = graph.phase(id);
    let pipeline_name = Arc::clone(phase.pipeline_arc());
    let kind = phase.kind();
    let Some(pipeline) = inner.pipelines.get(&pipeline_name) else {
        return Ok(());
    };
    let pipeline = Arc::clone(pipeline);

    if inner.token.is_cancelled() {
        return Err(ExecuteError::Cancelled {
            pipeline: pipeline_name.to_string(),
            phase: kind,
        });
    }

    let started_at = Utc::now();
    let started = Instant::now();
    let inputs = match kind.previous() {
        None => Batch::empty(),
        Some(previous) => inner
            .state
            .phase_outputs(&pipeline_name, previous)
            .unwrap_or_default(),
    };
    tracing::debug!(
        pipeline = %pipeline_name,
        phase = %kind,
        inputs = inputs.len(),
        "phase starting"
    );

    let chain = run_module_chain(
        inner,
        &pipeline_name,
        kind,
        pipeline.modules(kind),
        inputs.clone(),
    )
    .await;

    // Analyzers see the chain's outputs, or its inputs when it failed;
    // their results are collected either way.
    let analyzed = match &chain {
        Ok(outputs) => outputs.clone(),
        Err(_) => inputs,
    };
    run_analyzers(inner, &pipeline_name, kind, &analyzed).await;

    let outputs = chain?;
    let elapsed = started.elapsed();
    tracing::info!(
        pipeline = %pipeline_name,
        phase = %kind,
        outputs = outputs.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "phase completed"
    );
    inner.state.record_phase(
        &pipeline_name,
        PhaseResult::new(kind, outputs, started_at, started, elapsed),
    );
    Ok(())
}

/// Run a module list over a batch, raising the module events around each
/// module and honoring output overrides. Shared by phase execution and
/// [`ExecutionContext::execute_modules`].
pub(crate) async fn run_module_chain(
    inner: &Arc<ExecutionInner>,
    pipeline: &Arc<str>,
    phase: PhaseKind,
    modules: &[Arc<dyn Module>],
    inputs: Batch,
) -> Result<Batch, ExecuteError> {
    let mut current = inputs;
    for module in modules {
        if inner.token.is_cancelled() {
            return Err(ExecuteError::Cancelled {
                pipeline: pipeline.to_string(),
                phase,
            });
        }
        let module_name = module.name().to_string();

        let mut before = BeforeModuleExecution {
            pipeline: pipeline.to_string(),
            phase,
            module: module_name.clone(),
            inputs: current.clone(),
            overridden_outputs: None,
        };
        if let Err(source) = inner.events.before_module_execution.raise(&mut before).await {
            return Err(ExecuteError::Module {
                pipeline: pipeline.to_string(),
                phase,
                module: module_name,
                source,
            });
        }

        let module_started = Instant::now();
        let (mut outputs, elapsed_ms) = match before.overridden_outputs {
            Some(overridden) => {
                tracing::debug!(
                    pipeline = %pipeline,
                    phase = %phase,
                    module = %module_name,
                    "module outputs overridden, skipping execution"
                );
                (overridden, 0)
            }
            None => {
                let ctx = ExecutionContext::new(
                    Arc::clone(inner),
                    Arc::clone(pipeline),
                    phase,
                    current.clone(),
                );
                match module.execute(&ctx).await {
                    Ok(batch) => (
                        batch.unwrap_or_default(),
                        module_started.elapsed().as_millis() as u64,
                    ),
                    Err(source) => {
                        return Err(ExecuteError::Module {
                            pipeline: pipeline.to_string(),
                            phase,
                            module: module_name,
                            source,
                        });
                    }
                }
            }
        };

        let mut after = AfterModuleExecution {
            pipeline: pipeline.to_string(),
            phase,
            module: module_name.clone(),
            outputs: outputs.clone(),
            elapsed_ms,
            overridden_outputs: None,
        };
        if let Err(source) = inner.events.after_module_execution.raise(&mut after).await {
            return Err(ExecuteError::Module {
                pipeline: pipeline.to_string(),
                phase,
                module: module_name,
                source,
            });
        }
        if let Some(overridden) = after.overridden_outputs {
            outputs = overridden;
        }

        tracing::debug!(
            pipeline = %pipeline,
            phase = %phase,
            module = %module_name,
            outputs = outputs.len(),
            elapsed_ms,
            "module executed"
        );
        current = outputs;
    }
    Ok(current)
}

/// Run every active analyzer keyed to this phase; analyzer failures are
/// logged, never fatal.
async fn run_analyzers(
    inner: &Arc<ExecutionInner>,
    pipeline: &str,
    phase: PhaseKind,
    documents: &Batch,
) {
    let mut collected = Vec::new();
    for (analyzer, level) in &inner.analyzers {
        let keyed = analyzer.phases();
        if !keyed.is_empty() && !keyed.contains(&phase) {
            continue;
        }
        let ctx = AnalyzerContext { pipeline, phase, documents };
        match analyzer.analyze(ctx).await {
            Ok(messages) => collected.extend(messages.into_iter().map(|message| AnalyzerResult {
                analyzer: analyzer.name().to_string(),
                level: *level,
                pipeline: pipeline.to_string(),
                phase,
                message,
            })),
            Err(error) => tracing::warn!(
                analyzer = analyzer.name(),
                pipeline,
                %error,
                "analyzer failed"
            ),
        }
    }
    inner.state.add_analyzer_results(collected);
}
