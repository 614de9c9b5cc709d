//! Engine event bus.
//!
//! A strongly typed registry: one ordered handler list per event kind.
//! `raise` invokes handlers sequentially in registration order, awaiting
//! each, and returns `true` iff at least one handler was registered.
//! Handlers receive `&mut` args and may mutate them; the module events use
//! this to override a module's outputs. A handler error aborts the raise
//! and surfaces to the caller.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::documents::Batch;
use crate::engine::state::ExecutionOutputs;
use crate::graph::PhaseKind;

type Handler<E> = dyn for<'a> Fn(&'a mut E) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync;

/// An ordered list of async handlers for one event kind.
pub struct HandlerList<E> {
    handlers: RwLock<Vec<Arc<Handler<E>>>>,
}

impl<E> Default for HandlerList<E> {
    fn default() -> Self {
        Self { handlers: RwLock::new(Vec::new()) }
    }
}

impl<E: Send> HandlerList<E> {
    /// Append an async handler. Handlers run in registration order.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: for<'a> Fn(&'a mut E) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Append a synchronous handler.
    pub fn subscribe_fn<F>(&self, handler: F)
    where
        F: Fn(&mut E) + Send + Sync + 'static,
    {
        self.subscribe(move |args| {
            handler(args);
            Box::pin(async { Ok(()) })
        });
    }

    /// Invoke every handler in order, awaiting each. Returns `true` iff
    /// any handler was registered; the first handler error aborts the
    /// raise.
    pub async fn raise(&self, args: &mut E) -> anyhow::Result<bool> {
        let handlers: Vec<Arc<Handler<E>>> = self.handlers.read().iter().cloned().collect();
        for handler in &handlers {
            handler(args).await?;
        }
        Ok(!handlers.is_empty())
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

/// Raised once per execution, before any phase is scheduled.
#[derive(Debug, Clone)]
pub struct BeforeEngineExecution {
    pub execution_id: Uuid,
}

/// Raised once per execution, unconditionally, after phase tasks have been
/// awaited and the summary rendered.
#[derive(Debug, Clone)]
pub struct AfterEngineExecution {
    pub execution_id: Uuid,
    pub outputs: ExecutionOutputs,
    pub elapsed_ms: u64,
}

/// Raised by the deployment gate task once all non-deployment phase tasks
/// have completed and before any deployment pipeline's Input starts.
#[derive(Debug, Clone)]
pub struct BeforeDeployment {
    pub execution_id: Uuid,
}

/// Raised before each module executes. Setting `overridden_outputs`
/// suppresses the module's own execution and uses the supplied batch as
/// its outputs.
pub struct BeforeModuleExecution {
    pub pipeline: String,
    pub phase: PhaseKind,
    pub module: String,
    pub inputs: Batch,
    pub overridden_outputs: Option<Batch>,
}

/// Raised after each module executes (or is overridden). Setting
/// `overridden_outputs` replaces the batch handed to the next module.
pub struct AfterModuleExecution {
    pub pipeline: String,
    pub phase: PhaseKind,
    pub module: String,
    pub outputs: Batch,
    pub elapsed_ms: u64,
    pub overridden_outputs: Option<Batch>,
}

/// The engine's event registry; one field per event kind.
#[derive(Default)]
pub struct EventBus {
    pub before_engine_execution: HandlerList<BeforeEngineExecution>,
    pub after_engine_execution: HandlerList<AfterEngineExecution>,
    pub before_deployment: HandlerList<BeforeDeployment>,
    pub before_module_execution: HandlerList<BeforeModuleExecution>,
    pub after_module_execution: HandlerList<AfterModuleExecution>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Probe {
        calls: Vec<&'static str>,
    }

    #[tokio::test]
    async fn raise_reports_whether_any_handler_ran() {
        let list: HandlerList<Probe> = HandlerList::default();
        let mut args = Probe::default();
        assert!(!list.raise(&mut args).await.unwrap());

        list.subscribe_fn(|p: &mut Probe| p.calls.push("one"));
        assert!(list.raise(&mut args).await.unwrap());
        assert_eq!(args.calls, vec!["one"]);
    }

    fn push_second(p: &mut Probe) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            p.calls.push("second");
            Ok(())
        })
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let list: HandlerList<Probe> = HandlerList::default();
        list.subscribe_fn(|p: &mut Probe| p.calls.push("first"));
        list.subscribe(push_second);
        list.subscribe_fn(|p: &mut Probe| p.calls.push("third"));

        let mut args = Probe::default();
        list.raise(&mut args).await.unwrap();
        assert_eq!(args.calls, vec!["first", "second", "third"]);
    }

    fn explode(_: &mut Probe) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Err(anyhow::anyhow!("handler exploded")) })
    }

    #[tokio::test]
    async fn handler_error_aborts_the_raise() {
        let list: HandlerList<Probe> = HandlerList::default();
        list.subscribe_fn(|p: &mut Probe| p.calls.push("ran"));
        list.subscribe(explode);
        list.subscribe_fn(|p: &mut Probe| p.calls.push("never"));

        let mut args = Probe::default();
        let err = list.raise(&mut args).await.unwrap_err();
        assert!(err.to_string().contains("handler exploded"));
        assert_eq!(args.calls, vec!["ran"]);
    }

    #[tokio::test]
    async fn handlers_may_mutate_event_args() {
        let bus = EventBus::default();
        bus.before_module_execution.subscribe_fn(|args| {
            args.overridden_outputs = Some(Batch::empty());
        });

        let mut args = BeforeModuleExecution {
            pipeline: "docs".into(),
            phase: PhaseKind::Input,
            module: "Read".into(),
            inputs: Batch::empty(),
            overridden_outputs: None,
        };
        bus.before_module_execution.raise(&mut args).await.unwrap();
        assert!(args.overridden_outputs.is_some());
    }

    #[tokio::test]
    async fn raise_is_usable_across_tasks() {
        let bus = Arc::new(EventBus::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.before_deployment.subscribe_fn(move |args| {
            sink.lock().unwrap().push(args.execution_id);
        });

        let id = Uuid::new_v4();
        let bus2 = Arc::clone(&bus);
        tokio::spawn(async move {
            let mut args = BeforeDeployment { execution_id: id };
            bus2.before_deployment.raise(&mut args).await.unwrap();
        })
        .await
        .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[id]);
    }
}
