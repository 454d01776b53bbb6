//! In-memory tool registry.
//!
//! Effectively immutable after startup: `seal()` is called before the
//! server accepts connections and registration fails thereafter, so the
//! registry can be shared across sessions without further locking
//! discipline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use llmrtc_domain::cancel::CancelToken;
use llmrtc_domain::error::{Error, Result};
use llmrtc_domain::message::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caller context passed into every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub turn_id: String,
    /// Cancelled when the owning turn is cancelled; long-running handlers
    /// should check it.
    pub cancel: CancelToken,
}

/// A tool implementation. Receives the validated argument map.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Adapter for simple synchronous tools.
pub struct FnTool<F>(F);

impl<F> FnTool<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        (self.0)(args)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    /// Registration order, for stable `definitions()` output.
    order: RwLock<Vec<String>>,
    sealed: AtomicBool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Rejects duplicate names and any registration after
    /// the registry was sealed.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::Internal(format!(
                "tool registry is sealed; cannot register `{}`",
                definition.name
            )));
        }
        let name = definition.name.clone();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(Error::Tool {
                tool: name,
                message: "duplicate tool name".into(),
            });
        }
        tools.insert(
            name.clone(),
            RegisteredTool {
                definition,
                handler,
            },
        );
        self.order.write().push(name);
        Ok(())
    }

    /// Freeze the registry. Called once, before connections are accepted.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        tracing::info!(tools = self.len(), "tool registry sealed");
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().get(name).map(|t| t.definition.clone())
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().get(name).map(|t| t.handler.clone())
    }

    /// All definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        self.order
            .read()
            .iter()
            .filter_map(|name| tools.get(name).map(|t| t.definition.clone()))
            .collect()
    }

    /// Definitions for a named subset, preserving the subset's order.
    /// Unknown names are skipped (playbook validation catches them first).
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        names
            .iter()
            .filter_map(|name| tools.get(name).map(|t| t.definition.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dummy_def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "test tool".into(),
            parameters: json!({"type": "object"}),
            policy: None,
        }
    }

    fn dummy_handler() -> Arc<dyn ToolHandler> {
        Arc::new(FnTool::new(|_args| Ok(json!("ok"))))
    }

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(dummy_def("a"), dummy_handler()).unwrap();
        assert!(registry.contains("a"));
        assert!(registry.definition("a").is_some());
        assert!(registry.handler("a").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_rejected() {
        let registry = ToolRegistry::new();
        registry.register(dummy_def("a"), dummy_handler()).unwrap();
        let err = registry.register(dummy_def("a"), dummy_handler()).unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
    }

    #[test]
    fn sealed_registry_rejects_registration() {
        let registry = ToolRegistry::new();
        registry.seal();
        assert!(registry.is_sealed());
        assert!(registry.register(dummy_def("late"), dummy_handler()).is_err());
    }

    #[test]
    fn definitions_preserve_registration_order() {
        let registry = ToolRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(dummy_def(name), dummy_handler()).unwrap();
        }
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn definitions_for_subset() {
        let registry = ToolRegistry::new();
        for name in ["a", "b"] {
            registry.register(dummy_def(name), dummy_handler()).unwrap();
        }
        let names: Vec<_> = registry
            .definitions_for(&["b".into(), "missing".into()])
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["b"]);
    }
}
