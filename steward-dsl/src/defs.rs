//! Compile-time definition objects: resources, constructors, typedefs,
//! plugins and decorators.

use crate::context::ScopeId;
use crate::parser::ast::{Expr, Stmt};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use steward_core::{CompileError, Span, Type, Value};

/// A resolved type annotation. Typedefs stay distinct from plain types so
/// assignment can run their refinement condition.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Plain(Arc<Type>),
    Typedef(Arc<TypedefDefinition>),
}

impl TypeRef {
    pub fn ty(&self) -> Arc<Type> {
        match self {
            Self::Plain(ty) => ty.clone(),
            Self::Typedef(td) => td.ty.clone(),
        }
    }
}

/// One declared property of a resource definition.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Value>,
    pub span: Span,
}

/// A constructor: either the auto-generated default (one parameter per
/// declared property, assigned in order) or an `implement` block.
#[derive(Debug)]
pub struct ConstructorDefinition {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub body: Vec<Stmt>,
    /// Auto constructors have no body; the evaluator assigns the
    /// parameters straight onto `self`.
    pub auto: bool,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub default: Option<Value>,
}

/// A `resource` definition: merged (inherited plus own) properties,
/// promises, constructors and index columns.
pub struct ResourceDefinition {
    pub name: String,
    pub ty: Arc<Type>,
    pub base: Option<Arc<ResourceDefinition>>,
    pub properties: IndexMap<String, PropertySpec>,
    pub promises: IndexMap<String, Arc<Type>>,
    pub constructors: IndexMap<String, Arc<ConstructorDefinition>>,
    /// Property names whose values form the instance index. Defaults to
    /// the first declared property; `@index([...])` overrides.
    pub index_columns: Vec<String>,
    /// Lexical scope the definition was evaluated in; constructor bodies
    /// run under it.
    pub scope: ScopeId,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("promises", &self.promises.keys().collect::<Vec<_>>())
            .field("index_columns", &self.index_columns)
            .finish()
    }
}

/// A typedef: a named refinement of a base type. The condition expression
/// is kept as AST and evaluated with `self` bound to the candidate value.
#[derive(Debug)]
pub struct TypedefDefinition {
    pub name: String,
    pub ty: Arc<Type>,
    pub base: TypeRef,
    pub condition: Option<Expr>,
    pub scope: ScopeId,
}

/// Host function exposed to the DSL. The shim validates arguments against
/// `params` before the call and the result against `ret` after it.
pub struct PluginDefinition {
    pub name: String,
    pub params: Vec<(String, Arc<Type>)>,
    pub ret: Arc<Type>,
    pub func: PluginFn,
}

pub type PluginFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret.name)
            .finish()
    }
}

/// Host callable applied to a resource definition at definition time.
pub struct DecoratorDefinition {
    pub name: String,
    /// Expected value kind per argument position.
    pub arg_spec: Vec<steward_core::ValueKind>,
    pub func: DecoratorFn,
}

pub type DecoratorFn =
    Arc<dyn Fn(&mut ResourceDefinitionParts, &[Value], &Span) -> Result<(), CompileError> + Send + Sync>;

impl fmt::Debug for DecoratorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorDefinition")
            .field("name", &self.name)
            .finish()
    }
}

/// The mutable pieces of a resource definition a decorator may rewrite,
/// applied before the definition is frozen behind an `Arc`.
pub struct ResourceDefinitionParts {
    pub name: String,
    pub property_names: Vec<String>,
    pub index_columns: Vec<String>,
}

/// The builtin `@index(["col", ...])` decorator: overrides which property
/// values form the instance index.
pub fn index_decorator() -> DecoratorDefinition {
    DecoratorDefinition {
        name: "index".to_string(),
        arg_spec: vec![steward_core::ValueKind::List],
        func: Arc::new(|parts, args, span| {
            let Value::List(elements) = &args[0] else {
                return Err(CompileError::compilation(
                    "The index decorator expects a list of strings.",
                    Some(span.clone()),
                ));
            };
            let mut columns = Vec::new();
            for element in elements {
                let Value::Str(s) = element else {
                    return Err(CompileError::compilation(
                        "The index decorator expects a list of strings.",
                        Some(span.clone()),
                    ));
                };
                if !parts.property_names.iter().any(|p| p == &s.value) {
                    return Err(CompileError::compilation(
                        format!(
                            "Index column '{}' is not a property of resource '{}'.",
                            s.value, parts.name
                        ),
                        Some(span.clone()),
                    ));
                }
                columns.push(s.value.clone());
            }
            parts.index_columns = columns;
            Ok(())
        }),
    }
}
