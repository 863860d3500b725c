//! The handler contract: per-resource-kind code that drives a resource to
//! its declared state.

use crate::error::EngineError;
use crate::resource::{PromiseSlot, ResourceId};
use crate::value::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Deployment-time state for one resource, owned by the scheduler and
/// handed to the handler for the duration of a lifecycle.
#[derive(Debug)]
pub struct HandlerContext {
    pub resource: ResourceId,
    pub index: String,
    /// Materialised JSON view of the resource, promises resolved.
    pub view: serde_json::Value,
    /// Promise-resolved snapshot of the raw property values.
    properties: IndexMap<String, Value>,
    promises: IndexMap<String, Arc<PromiseSlot>>,
    /// Drift observed by `read`; a non-empty map triggers `update`.
    pub changes: HashMap<String, serde_json::Value>,
    pub deployed: bool,
    pub updated: bool,
    pub failed: bool,
}

impl HandlerContext {
    pub fn new(
        resource: ResourceId,
        index: String,
        view: serde_json::Value,
        properties: IndexMap<String, Value>,
        promises: IndexMap<String, Arc<PromiseSlot>>,
    ) -> Self {
        Self {
            resource,
            index,
            view,
            properties,
            promises,
            changes: HashMap::new(),
            deployed: false,
            updated: false,
            failed: false,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// A promise slot declared on this resource, for the owning handler to
    /// fulfill.
    pub fn promise(&self, name: &str) -> Option<&Arc<PromiseSlot>> {
        self.promises.get(name)
    }

    pub fn add_change(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.changes.insert(key.into(), value);
    }
}

/// Lifecycle methods for one resource kind.
///
/// Every method defaults to a succeeding no-op, so a handler implements
/// only the steps its resource needs. The scheduler calls `read`, then
/// `create` when the resource is not deployed, or `update` when `read`
/// recorded changes. `delete` is reserved for explicit teardown. `cleanup`
/// runs unconditionally after the whole run drains. `dry_run` must be free
/// of side effects.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn read(&self, _ctx: &mut HandlerContext) -> Result<(), EngineError> {
        Ok(())
    }

    async fn create(&self, _ctx: &mut HandlerContext) -> Result<(), EngineError> {
        Ok(())
    }

    async fn update(&self, _ctx: &mut HandlerContext) -> Result<(), EngineError> {
        Ok(())
    }

    async fn delete(&self, _ctx: &mut HandlerContext) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cleanup(&self, _ctx: &mut HandlerContext) -> Result<(), EngineError> {
        Ok(())
    }

    async fn dry_run(&self, ctx: &HandlerContext) -> Result<(), EngineError> {
        tracing::info!(resource = %ctx.index, "dry-run: would reconcile");
        Ok(())
    }
}

/// Maps resource type names to their handlers. Built at startup and passed
/// down explicitly.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(resource_type.into(), handler);
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(resource_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("resource_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
