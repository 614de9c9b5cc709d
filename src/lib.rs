//! Pipeline execution engine for static content generation.
//!
//! Authors declare named [`pipeline::Pipeline`]s, each an ordered list of
//! async [`module::Module`]s grouped into four fixed phases (Input, Process,
//! PostProcess, Output). The [`engine::Engine`] compiles those declarations
//! into a phase dependency graph, schedules phases concurrently on tokio,
//! streams immutable document batches through each phase's module chain,
//! aggregates per-phase results, and honors cooperative cancellation.

pub mod analysis;
pub mod config;
pub mod documents;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fs;
pub mod graph;
pub mod logging;
pub mod module;
pub mod pipeline;
