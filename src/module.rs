//! The module contract: the async unit of work inside a phase.

use async_trait::async_trait;

use crate::documents::Batch;
use crate::engine::context::ExecutionContext;

/// A user-supplied async batch transformer.
///
/// Modules are chained inside a phase: each receives the previous module's
/// outputs through [`ExecutionContext::inputs`] and returns the next batch.
/// Returning `None` is equivalent to returning an empty batch. A returned
/// error aborts the enclosing phase; the engine wraps it with the
/// pipeline/phase/module breadcrumb before propagating.
///
/// Modules may suspend on I/O and should observe
/// [`ExecutionContext::cancellation_token`] across long waits; the engine
/// itself only polls the token between modules.
#[async_trait]
pub trait Module: Send + Sync {
    /// Name used in logs and error breadcrumbs. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<Option<Batch>>;
}
