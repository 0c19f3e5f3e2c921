//! Workflow definition: the user-supplied program plus its signal and query
//! handler tables.
//!
//! One sandbox hosts exactly one workflow run, so unlike a worker-side
//! registry there is no name-to-handler lookup across workflow types; the
//! definition is bound at engine init. Handlers are registered as closures
//! through the builder and stored behind trait objects.

use crate::context::WorkflowContext;
use crate::errors::WorkflowFailure;
use crate::proto::Payload;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// The workflow entry point.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: WorkflowContext,
        arguments: Vec<Payload>,
    ) -> Result<Payload, WorkflowFailure>;
}

/// Adapter so plain async closures can serve as the entry point.
pub struct FnWorkflow<F>(pub F);

#[async_trait]
impl<F, Fut> WorkflowHandler for FnWorkflow<F>
where
    F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, WorkflowFailure>> + Send + 'static,
{
    async fn execute(
        &self,
        ctx: WorkflowContext,
        arguments: Vec<Payload>,
    ) -> Result<Payload, WorkflowFailure> {
        (self.0)(ctx, arguments).await
    }
}

/// Handler for one named signal.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: WorkflowContext,
        input: Vec<Payload>,
    ) -> Result<(), WorkflowFailure>;
}

pub struct FnSignal<F>(pub F);

#[async_trait]
impl<F, Fut> SignalHandler for FnSignal<F>
where
    F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkflowFailure>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: WorkflowContext,
        input: Vec<Payload>,
    ) -> Result<(), WorkflowFailure> {
        (self.0)(ctx, input).await
    }
}

/// Handler for one named query. Queries are read-only; emitting a command
/// from one is a determinism violation.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: WorkflowContext,
        arguments: Vec<Payload>,
    ) -> Result<Payload, WorkflowFailure>;
}

pub struct FnQuery<F>(pub F);

#[async_trait]
impl<F, Fut> QueryHandler for FnQuery<F>
where
    F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, WorkflowFailure>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: WorkflowContext,
        arguments: Vec<Payload>,
    ) -> Result<Payload, WorkflowFailure> {
        (self.0)(ctx, arguments).await
    }
}

/// A workflow program bound into the sandbox at init.
#[derive(Clone)]
pub struct WorkflowDefinition {
    workflow_type: String,
    main: Arc<dyn WorkflowHandler>,
    signals: HashMap<String, Arc<dyn SignalHandler>>,
    queries: HashMap<String, Arc<dyn QueryHandler>>,
}

impl WorkflowDefinition {
    pub fn builder(workflow_type: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            workflow_type: workflow_type.into(),
            main: None,
            signals: HashMap::new(),
            queries: HashMap::new(),
        }
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub(crate) fn main(&self) -> Arc<dyn WorkflowHandler> {
        self.main.clone()
    }

    pub(crate) fn signal(&self, name: &str) -> Option<Arc<dyn SignalHandler>> {
        self.signals.get(name).cloned()
    }

    pub(crate) fn query(&self, name: &str) -> Option<Arc<dyn QueryHandler>> {
        self.queries.get(name).cloned()
    }
}

pub struct WorkflowDefinitionBuilder {
    workflow_type: String,
    main: Option<Arc<dyn WorkflowHandler>>,
    signals: HashMap<String, Arc<dyn SignalHandler>>,
    queries: HashMap<String, Arc<dyn QueryHandler>>,
}

impl WorkflowDefinitionBuilder {
    /// Register the entry point.
    pub fn main<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, WorkflowFailure>> + Send + 'static,
    {
        self.main = Some(Arc::new(FnWorkflow(f)));
        self
    }

    /// Register a signal handler under its wire name.
    pub fn signal<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkflowFailure>> + Send + 'static,
    {
        self.signals.insert(name.into(), Arc::new(FnSignal(f)));
        self
    }

    /// Register a query handler under its wire name.
    pub fn query<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, WorkflowFailure>> + Send + 'static,
    {
        self.queries.insert(name.into(), Arc::new(FnQuery(f)));
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, String> {
        let main = self
            .main
            .ok_or_else(|| format!("workflow {} has no entry point", self.workflow_type))?;
        Ok(WorkflowDefinition {
            workflow_type: self.workflow_type,
            main,
            signals: self.signals,
            queries: self.queries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_main() {
        let result = WorkflowDefinition::builder("NoMain").build();
        assert!(result.is_err());
    }

    #[test]
    fn handlers_are_resolvable_by_name() {
        let definition = WorkflowDefinition::builder("HasHandlers")
            .main(|_ctx, _args| async { Ok(Payload::default()) })
            .signal("unblock", |_ctx, _input| async { Ok(()) })
            .query("status", |_ctx, _args| async { Ok(Payload::default()) })
            .build()
            .unwrap();

        assert_eq!(definition.workflow_type(), "HasHandlers");
        assert!(definition.signal("unblock").is_some());
        assert!(definition.signal("other").is_none());
        assert!(definition.query("status").is_some());
        assert!(definition.query("other").is_none());
    }
}
