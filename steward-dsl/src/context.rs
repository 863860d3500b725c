//! Lexically scoped name resolution.
//!
//! Scopes live in an arena with parent links. `get` walks upward through
//! the chain; `set` refuses to shadow any binding that is already visible,
//! making names single-assignment along a scope chain.

use crate::defs::{DecoratorDefinition, PluginDefinition, ResourceDefinition, TypedefDefinition};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{CompileError, Span, Type, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

/// Everything a name can resolve to.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Type(Arc<Type>),
    ResourceDef(Arc<ResourceDefinition>),
    Typedef(Arc<TypedefDefinition>),
    Plugin(Arc<PluginDefinition>),
    Decorator(Arc<DecoratorDefinition>),
    Module(ScopeId),
    /// The resource under construction in a constructor body; the payload
    /// indexes the evaluator's construction stack.
    SelfRef(usize),
}

#[derive(Debug)]
pub struct Scope {
    pub name: String,
    pub parent: Option<ScopeId>,
    bindings: IndexMap<String, Binding>,
}

/// The whole scope tree for one compilation.
#[derive(Debug)]
pub struct ContextTree {
    scopes: Vec<Scope>,
    modules: HashMap<String, ScopeId>,
}

pub const ROOT: ScopeId = ScopeId(0);

impl ContextTree {
    pub fn new() -> Self {
        let mut tree = Self {
            scopes: Vec::new(),
            modules: HashMap::new(),
        };
        let root = tree.push_scope("<root>", None);
        debug_assert_eq!(root, ROOT);
        tree.seed_builtins();
        tree
    }

    fn seed_builtins(&mut self) {
        let builtins = [
            ("int", Type::int()),
            ("float", Type::float()),
            ("bool", Type::bool()),
            ("str", Type::str()),
            ("ProtectedStr", Type::protected_str()),
            ("Path", Type::path()),
            ("None", Type::none()),
        ];
        for (name, ty) in builtins {
            self.scopes[ROOT.0]
                .bindings
                .insert(name.to_string(), Binding::Type(ty));
        }
    }

    pub fn push_scope(&mut self, name: impl Into<String>, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            name: name.into(),
            parent,
            bindings: IndexMap::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    /// Resolves a name by walking the scope chain upward.
    pub fn get(&self, scope: ScopeId, name: &str) -> Option<Binding> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if let Some(binding) = self.scopes[id.0].bindings.get(name) {
                return Some(binding.clone());
            }
            cursor = self.scopes[id.0].parent;
        }
        None
    }

    /// Resolves a name in one scope only, as attribute access on modules
    /// does.
    pub fn get_local(&self, scope: ScopeId, name: &str) -> Option<Binding> {
        self.scopes[scope.0].bindings.get(name).cloned()
    }

    /// Binds a name. Shadowing anything already visible from this scope is
    /// an error: names are single-assignment along a scope chain.
    pub fn set(
        &mut self,
        scope: ScopeId,
        name: &str,
        binding: Binding,
        span: Option<Span>,
    ) -> Result<(), CompileError> {
        if self.get(scope, name).is_some() {
            return Err(CompileError::compilation(
                format!("Illegal operation: tried to reassign '{name}'."),
                span,
            ));
        }
        self.scopes[scope.0]
            .bindings
            .insert(name.to_string(), binding);
        Ok(())
    }

    /// Binds a name without the shadow check. Used for module bindings
    /// that may legitimately repeat (`import a.b` twice).
    pub fn set_if_absent(&mut self, scope: ScopeId, name: &str, binding: Binding) {
        if self.scopes[scope.0].bindings.get(name).is_none() {
            self.scopes[scope.0]
                .bindings
                .insert(name.to_string(), binding);
        }
    }

    /// The module scope for a dotted path, created under `parent` on first
    /// use and reused afterwards. Returns whether it was created.
    pub fn module_scope(&mut self, dotted: &str, parent: ScopeId) -> (ScopeId, bool) {
        if let Some(&id) = self.modules.get(dotted) {
            return (id, false);
        }
        let id = self.push_scope(dotted, Some(parent));
        self.modules.insert(dotted.to_string(), id);
        (id, true)
    }

    pub fn bindings(&self, scope: ScopeId) -> impl Iterator<Item = (&String, &Binding)> {
        self.scopes[scope.0].bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_upward() {
        let mut tree = ContextTree::new();
        let child = tree.push_scope("child", Some(ROOT));
        tree.set(ROOT, "a", Binding::Value(Value::Int(1)), None)
            .unwrap();
        assert!(tree.get(child, "a").is_some());
        assert!(tree.get_local(child, "a").is_none());
    }

    #[test]
    fn set_refuses_to_shadow() {
        let mut tree = ContextTree::new();
        let child = tree.push_scope("child", Some(ROOT));
        tree.set(ROOT, "a", Binding::Value(Value::Int(1)), None)
            .unwrap();
        let err = tree
            .set(child, "a", Binding::Value(Value::Int(2)), None)
            .unwrap_err();
        assert!(matches!(err, CompileError::Compilation { .. }));
    }

    #[test]
    fn builtin_types_resolve_from_any_scope() {
        let mut tree = ContextTree::new();
        let child = tree.push_scope("child", Some(ROOT));
        assert!(matches!(tree.get(child, "int"), Some(Binding::Type(_))));
    }

    #[test]
    fn module_scope_is_reused() {
        let mut tree = ContextTree::new();
        let (first, created) = tree.module_scope("std.env", ROOT);
        assert!(created);
        let (second, created) = tree.module_scope("std.env", ROOT);
        assert!(!created);
        assert_eq!(first, second);
    }
}
