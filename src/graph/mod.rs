//! Phase dependency graph construction.
//!
//! Pipeline declarations are compiled into a [`PhaseGraph`]: four
//! [`Phase`] nodes per pipeline wired by dependency edges, stored in a
//! topologically sorted order so a dependency always precedes its
//! dependents. The [`builder`] performs the per-pipeline DFS, the
//! post-process cross-link pass, the deployment input-gate pass, and the
//! final deterministic sort.

mod builder;
mod phase;

pub use builder::build_phase_graph;
pub use phase::{Phase, PhaseGraph, PhaseId, PhaseKind};
