//! Compiles pipeline declarations into a topologically sorted phase graph.
//!
//! Construction runs in two passes plus a final sort:
//!
//! 1. Per-pipeline DFS: validates dependencies, creates each pipeline's
//!    four phases, and wires `Process` to the owning `Input` plus every
//!    dependency's `Process`.
//! 2. Cross-link passes: every non-isolated pipeline's `PostProcess` gains
//!    the `Process` of every other non-isolated pipeline with the same
//!    deployment flag, and every deployment pipeline's `Input` gains the
//!    `Output` of every non-deployment pipeline.
//! 3. Depth-first topological sort in pipeline-insertion order, so the
//!    emitted order is deterministic across runs.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::GraphError;
use crate::graph::phase::{Phase, PhaseGraph, PhaseId, PhaseKind};
use crate::pipeline::{Pipeline, PipelineCollection};

/// Build the phase graph for the whole collection.
pub fn build_phase_graph(pipelines: &PipelineCollection) -> Result<PhaseGraph, GraphError> {
    let mut builder = Builder {
        collection: pipelines,
        phases: Vec::with_capacity(pipelines.len() * 4),
        by_pipeline: IndexMap::with_capacity(pipelines.len()),
        visiting: HashSet::new(),
    };

    for pipeline in pipelines.iter() {
        builder.visit(pipeline)?;
    }
    builder.cross_link_post_process();
    builder.gate_deployment_inputs();
    let order = builder.sort();

    Ok(PhaseGraph::new(builder.phases, order, builder.by_pipeline))
}

struct Builder<'a> {
    collection: &'a PipelineCollection,
    phases: Vec<Phase>,
    by_pipeline: IndexMap<String, [PhaseId; 4]>,
    visiting: HashSet<String>,
}

impl Builder<'_> {
    /// Register a pipeline's four phases, recursing into dependencies
    /// first. A revisit before registration completes is a cycle.
    fn visit(&mut self, pipeline: &Arc<Pipeline>) -> Result<[PhaseId; 4], GraphError> {
        let key = pipeline.name().to_ascii_lowercase();
        if let Some(ids) = self.by_pipeline.get(&key) {
            return Ok(*ids);
        }
        if self.visiting.contains(&key) {
            return Err(GraphError::CyclicDependency {
                pipeline: pipeline.name().to_string(),
            });
        }

        if pipeline.is_isolated() {
            if !pipeline.dependencies().is_empty() {
                return Err(GraphError::IsolatedDependencies {
                    pipeline: pipeline.name().to_string(),
                });
            }
            let ids = self.register(pipeline, Vec::new());
            return Ok(ids);
        }

        self.visiting.insert(key.clone());
        let mut dependency_processes = Vec::new();
        for dependency in pipeline.dependencies() {
            let Some(target) = self.collection.get(dependency) else {
                return Err(GraphError::MissingDependency {
                    pipeline: pipeline.name().to_string(),
                    dependency: dependency.clone(),
                });
            };
            if target.is_isolated() {
                return Err(GraphError::DependencyOnIsolated {
                    pipeline: pipeline.name().to_string(),
                    dependency: target.name().to_string(),
                });
            }
            if target.is_deployment() && !pipeline.is_deployment() {
                return Err(GraphError::DependencyOnDeployment {
                    pipeline: pipeline.name().to_string(),
                    dependency: target.name().to_string(),
                });
            }
            let target = Arc::clone(target);
            let ids = self.visit(&target)?;
            dependency_processes.push(ids[PhaseKind::Process.index()]);
        }
        self.visiting.remove(&key);

        Ok(self.register(pipeline, dependency_processes))
    }

    /// Create the four phases of a pipeline: Input has no intra-pass
    /// dependencies, Process depends on Input plus every dependency's
    /// Process, and PostProcess/Output chain on their predecessor.
    fn register(
        &mut self,
        pipeline: &Arc<Pipeline>,
        dependency_processes: Vec<PhaseId>,
    ) -> [PhaseId; 4] {
        let name: Arc<str> = Arc::from(pipeline.name());
        let input = self.push(Phase::new(Arc::clone(&name), PhaseKind::Input, Vec::new()));

        let mut process_deps = vec![input];
        process_deps.extend(dependency_processes);
        let process = self.push(Phase::new(Arc::clone(&name), PhaseKind::Process, process_deps));

        let post_process = self.push(Phase::new(
            Arc::clone(&name),
            PhaseKind::PostProcess,
            vec![process],
        ));
        let output = self.push(Phase::new(name, PhaseKind::Output, vec![post_process]));

        let ids = [input, process, post_process, output];
        self.by_pipeline
            .insert(pipeline.name().to_ascii_lowercase(), ids);
        ids
    }

    fn push(&mut self, phase: Phase) -> PhaseId {
        self.phases.push(phase);
        self.phases.len() - 1
    }

    /// Every non-isolated pipeline's PostProcess waits for the Process of
    /// every other non-isolated pipeline with the same deployment flag.
    fn cross_link_post_process(&mut self) {
        for pipeline in self.collection.iter() {
            if pipeline.is_isolated() {
                continue;
            }
            let ids = self.by_pipeline[&pipeline.name().to_ascii_lowercase()];
            for other in self.collection.iter() {
                if other.is_isolated()
                    || other.name().eq_ignore_ascii_case(pipeline.name())
                    || other.is_deployment() != pipeline.is_deployment()
                {
                    continue;
                }
                let other_ids = self.by_pipeline[&other.name().to_ascii_lowercase()];
                self.phases[ids[PhaseKind::PostProcess.index()]]
                    .push_dependency(other_ids[PhaseKind::Process.index()]);
            }
        }
    }

    /// Every deployment pipeline's Input waits for the Output of every
    /// non-deployment pipeline, isolated or not.
    fn gate_deployment_inputs(&mut self) {
        for pipeline in self.collection.iter() {
            if !pipeline.is_deployment() {
                continue;
            }
            let ids = self.by_pipeline[&pipeline.name().to_ascii_lowercase()];
            for other in self.collection.iter() {
                if other.is_deployment() {
                    continue;
                }
                let other_ids = self.by_pipeline[&other.name().to_ascii_lowercase()];
                self.phases[ids[PhaseKind::Input.index()]]
                    .push_dependency(other_ids[PhaseKind::Output.index()]);
            }
        }
    }

    /// Deterministic topological DFS: pipelines in insertion order, phase
    /// kinds in execution order, each phase emitted after its
    /// dependencies. The cross-link passes only add edges from later
    /// phase kinds to earlier ones of other pipelines, so no cycle can
    /// appear here.
    fn sort(&self) -> Vec<PhaseId> {
        let mut emitted = vec![false; self.phases.len()];
        let mut order = Vec::with_capacity(self.phases.len());
        for pipeline in self.collection.iter() {
            let ids = self.by_pipeline[&pipeline.name().to_ascii_lowercase()];
            for id in ids {
                self.emit(id, &mut emitted, &mut order);
            }
        }
        order
    }

    fn emit(&self, id: PhaseId, emitted: &mut [bool], order: &mut Vec<PhaseId>) {
        if emitted[id] {
            return;
        }
        emitted[id] = true;
        for &dependency in self.phases[id].dependencies() {
            self.emit(dependency, emitted, order);
        }
        order.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;

    fn collection(pipelines: Vec<Pipeline>) -> PipelineCollection {
        let mut c = PipelineCollection::new();
        for p in pipelines {
            c.add(p).unwrap();
        }
        c
    }

    fn assert_topological(graph: &PhaseGraph) {
        let position: std::collections::HashMap<PhaseId, usize> = graph
            .order()
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        assert_eq!(position.len(), graph.len());
        for &id in graph.order() {
            for &dep in graph.phase(id).dependencies() {
                assert!(
                    position[&dep] < position[&id],
                    "{} must appear before {}",
                    graph.phase(dep),
                    graph.phase(id)
                );
            }
        }
    }

    #[test]
    fn single_pipeline_forms_a_linear_chain() {
        let graph = build_phase_graph(&collection(vec![Pipeline::named("a").build()])).unwrap();

        assert_eq!(graph.len(), 4);
        let ids = graph.phases_of("a").unwrap();
        assert!(graph.phase(ids[0]).dependencies().is_empty());
        assert_eq!(graph.phase(ids[1]).dependencies(), &[ids[0]]);
        assert_eq!(graph.phase(ids[2]).dependencies(), &[ids[1]]);
        assert_eq!(graph.phase(ids[3]).dependencies(), &[ids[2]]);
        assert_topological(&graph);
    }

    #[test]
    fn dependency_wires_process_to_dependency_process() {
        let graph = build_phase_graph(&collection(vec![
            Pipeline::named("a").build(),
            Pipeline::named("b").with_dependency("a").build(),
        ]))
        .unwrap();

        let a = graph.phases_of("a").unwrap();
        let b = graph.phases_of("b").unwrap();
        let b_process = graph.phase(b[PhaseKind::Process.index()]);
        assert!(b_process.dependencies().contains(&b[0]));
        assert!(
            b_process
                .dependencies()
                .contains(&a[PhaseKind::Process.index()])
        );
        assert_topological(&graph);
    }

    #[test]
    fn dependencies_resolve_case_insensitively() {
        let graph = build_phase_graph(&collection(vec![
            Pipeline::named("Content").build(),
            Pipeline::named("feed").with_dependency("CONTENT").build(),
        ]))
        .unwrap();
        assert_topological(&graph);
    }

    #[test]
    fn post_process_cross_links_same_deployment_group() {
        let graph = build_phase_graph(&collection(vec![
            Pipeline::named("a").build(),
            Pipeline::named("b").build(),
            Pipeline::named("d").deployment(true).build(),
        ]))
        .unwrap();

        let a = graph.phases_of("a").unwrap();
        let b = graph.phases_of("b").unwrap();
        let d = graph.phases_of("d").unwrap();

        let a_post = graph.phase(a[PhaseKind::PostProcess.index()]);
        assert!(a_post.dependencies().contains(&b[PhaseKind::Process.index()]));
        let b_post = graph.phase(b[PhaseKind::PostProcess.index()]);
        assert!(b_post.dependencies().contains(&a[PhaseKind::Process.index()]));

        // The deployment pipeline is in its own group.
        assert!(!a_post.dependencies().contains(&d[PhaseKind::Process.index()]));
        let d_post = graph.phase(d[PhaseKind::PostProcess.index()]);
        assert_eq!(d_post.dependencies(), &[d[PhaseKind::Process.index()]]);
        assert_topological(&graph);
    }

    #[test]
    fn deployment_input_waits_for_every_non_deployment_output() {
        let graph = build_phase_graph(&collection(vec![
            Pipeline::named("a").build(),
            Pipeline::named("iso").isolated(true).build(),
            Pipeline::named("deploy").deployment(true).build(),
        ]))
        .unwrap();

        let a = graph.phases_of("a").unwrap();
        let iso = graph.phases_of("iso").unwrap();
        let deploy = graph.phases_of("deploy").unwrap();

        let input = graph.phase(deploy[PhaseKind::Input.index()]);
        assert!(input.dependencies().contains(&a[PhaseKind::Output.index()]));
        assert!(input.dependencies().contains(&iso[PhaseKind::Output.index()]));
        assert_topological(&graph);
    }

    #[test]
    fn isolated_pipeline_stays_disconnected() {
        let graph = build_phase_graph(&collection(vec![
            Pipeline::named("a").build(),
            Pipeline::named("iso").isolated(true).build(),
        ]))
        .unwrap();

        let iso = graph.phases_of("iso").unwrap();
        let a = graph.phases_of("a").unwrap();

        // The isolated chain has only intra-pipeline edges.
        assert!(graph.phase(iso[0]).dependencies().is_empty());
        assert_eq!(graph.phase(iso[1]).dependencies(), &[iso[0]]);
        assert_eq!(graph.phase(iso[2]).dependencies(), &[iso[1]]);
        assert_eq!(graph.phase(iso[3]).dependencies(), &[iso[2]]);

        // And nothing in `a` points at it.
        for id in a {
            for &dep in graph.phase(id).dependencies() {
                assert!(!graph.phase(dep).pipeline().eq_ignore_ascii_case("iso"));
            }
        }
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let err = build_phase_graph(&collection(vec![
            Pipeline::named("a").with_dependency("ghost").build(),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::MissingDependency { .. }));
    }

    #[test]
    fn isolated_pipeline_with_dependencies_is_rejected() {
        let err = build_phase_graph(&collection(vec![
            Pipeline::named("a").build(),
            Pipeline::named("iso")
                .isolated(true)
                .with_dependency("a")
                .build(),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::IsolatedDependencies { .. }));
    }

    #[test]
    fn depending_on_an_isolated_pipeline_is_rejected() {
        let err = build_phase_graph(&collection(vec![
            Pipeline::named("iso").isolated(true).build(),
            Pipeline::named("a").with_dependency("iso").build(),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::DependencyOnIsolated { .. }));
    }

    #[test]
    fn non_deployment_depending_on_deployment_is_rejected() {
        let err = build_phase_graph(&collection(vec![
            Pipeline::named("deploy").deployment(true).build(),
            Pipeline::named("a").with_dependency("deploy").build(),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::DependencyOnDeployment { .. }));

        // Deployment depending on deployment is fine.
        build_phase_graph(&collection(vec![
            Pipeline::named("stage").deployment(true).build(),
            Pipeline::named("publish")
                .deployment(true)
                .with_dependency("stage")
                .build(),
        ]))
        .unwrap();
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let err = build_phase_graph(&collection(vec![
            Pipeline::named("a").with_dependency("c").build(),
            Pipeline::named("b").with_dependency("a").build(),
            Pipeline::named("c").with_dependency("b").build(),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { .. }));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = build_phase_graph(&collection(vec![
            Pipeline::named("a").with_dependency("a").build(),
        ]))
        .unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { .. }));
    }

    #[test]
    fn order_is_deterministic_across_builds() {
        let pipelines = collection(vec![
            Pipeline::named("a").build(),
            Pipeline::named("b").with_dependency("a").build(),
            Pipeline::named("c").build(),
            Pipeline::named("deploy").deployment(true).build(),
        ]);

        let first = build_phase_graph(&pipelines).unwrap();
        let second = build_phase_graph(&pipelines).unwrap();
        assert_eq!(first.order(), second.order());

        let names: Vec<String> = first
            .order()
            .iter()
            .map(|&id| first.phase(id).to_string())
            .collect();
        let again: Vec<String> = second
            .order()
            .iter()
            .map(|&id| second.phase(id).to_string())
            .collect();
        assert_eq!(names, again);
        assert_topological(&first);
    }

    #[test]
    fn diamond_dependencies_sort_topologically() {
        let graph = build_phase_graph(&collection(vec![
            Pipeline::named("base").build(),
            Pipeline::named("left").with_dependency("base").build(),
            Pipeline::named("right").with_dependency("base").build(),
            Pipeline::named("top")
                .with_dependencies(["left", "right"])
                .build(),
        ]))
        .unwrap();

        assert_eq!(graph.len(), 16);
        assert_topological(&graph);
    }
}
