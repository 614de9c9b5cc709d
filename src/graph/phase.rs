//! Phase nodes and the compiled phase graph.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One of the four fixed phases of a pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Input,
    Process,
    PostProcess,
    Output,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 4] = [
        PhaseKind::Input,
        PhaseKind::Process,
        PhaseKind::PostProcess,
        PhaseKind::Output,
    ];

    /// Slot index into per-pipeline four-element arrays.
    pub fn index(self) -> usize {
        match self {
            PhaseKind::Input => 0,
            PhaseKind::Process => 1,
            PhaseKind::PostProcess => 2,
            PhaseKind::Output => 3,
        }
    }

    /// The intra-pipeline predecessor, if any.
    pub fn previous(self) -> Option<PhaseKind> {
        match self {
            PhaseKind::Input => None,
            PhaseKind::Process => Some(PhaseKind::Input),
            PhaseKind::PostProcess => Some(PhaseKind::Process),
            PhaseKind::Output => Some(PhaseKind::PostProcess),
        }
    }

    /// Single-letter marker used in the execution timeline.
    pub fn letter(self) -> char {
        match self {
            PhaseKind::Input => 'I',
            PhaseKind::Process => 'P',
            PhaseKind::PostProcess => 'T',
            PhaseKind::Output => 'O',
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseKind::Input => "input",
            PhaseKind::Process => "process",
            PhaseKind::PostProcess => "post-process",
            PhaseKind::Output => "output",
        };
        f.write_str(name)
    }
}

/// Index of a phase within its [`PhaseGraph`].
pub type PhaseId = usize;

/// A runnable phase node: one pipeline crossed with one [`PhaseKind`],
/// plus the phases that must complete successfully before it starts.
#[derive(Debug, Clone)]
pub struct Phase {
    pipeline: Arc<str>,
    kind: PhaseKind,
    dependencies: Vec<PhaseId>,
}

impl Phase {
    pub(crate) fn new(pipeline: Arc<str>, kind: PhaseKind, dependencies: Vec<PhaseId>) -> Self {
        Self { pipeline, kind, dependencies }
    }

    /// Name of the owning pipeline, in its declared casing.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub(crate) fn pipeline_arc(&self) -> &Arc<str> {
        &self.pipeline
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn dependencies(&self) -> &[PhaseId] {
        &self.dependencies
    }

    pub(crate) fn push_dependency(&mut self, id: PhaseId) {
        self.dependencies.push(id);
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pipeline, self.kind)
    }
}

/// The compiled phase graph: an arena of [`Phase`] nodes and a
/// topologically sorted execution order over them.
#[derive(Debug)]
pub struct PhaseGraph {
    phases: Vec<Phase>,
    order: Vec<PhaseId>,
    by_pipeline: IndexMap<String, [PhaseId; 4]>,
}

impl PhaseGraph {
    pub(crate) fn new(
        phases: Vec<Phase>,
        order: Vec<PhaseId>,
        by_pipeline: IndexMap<String, [PhaseId; 4]>,
    ) -> Self {
        Self { phases, order, by_pipeline }
    }

    /// Total number of phases (four per pipeline).
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phase(&self, id: PhaseId) -> &Phase {
        &self.phases[id]
    }

    /// Phase ids in dependency order: a dependency always appears before
    /// its dependents.
    pub fn order(&self) -> &[PhaseId] {
        &self.order
    }

    /// The four phase ids of a pipeline, case-insensitive lookup, indexed
    /// by [`PhaseKind::index`].
    pub fn phases_of(&self, pipeline: &str) -> Option<[PhaseId; 4]> {
        self.by_pipeline.get(&pipeline.to_ascii_lowercase()).copied()
    }

    pub fn phase_id(&self, pipeline: &str, kind: PhaseKind) -> Option<PhaseId> {
        self.phases_of(pipeline).map(|ids| ids[kind.index()])
    }

    /// Pipelines in declaration order.
    pub fn pipelines(&self) -> impl Iterator<Item = &str> {
        self.by_pipeline
            .values()
            .map(|ids| self.phases[ids[0]].pipeline())
    }
}
