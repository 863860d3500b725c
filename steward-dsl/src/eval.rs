//! The evaluator walks the AST once per file, top to bottom, with side
//! effects on the scope tree and the resource arena.

use crate::context::{Binding, ContextTree, ScopeId, ROOT};
use crate::defs::{
    index_decorator, ConstructorDefinition, DecoratorDefinition, ParamSpec, PropertySpec,
    ResourceDefinition, ResourceDefinitionParts, TypeRef, TypedefDefinition,
};
use crate::importer::Importer;
use crate::lexer::Token;
use crate::parser::ast::*;
use crate::parser::Parser;
use crate::plugin::call_plugin;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steward_core::{
    format_index, CompileError, DictKey, EnumMember, Model, PromiseSlot, ResourceRef, Span, Type,
    TypeForm, Value,
};

/// Compiles DSL entrypoints into a [`Compiled`] model.
pub struct Compiler {
    search_paths: Vec<PathBuf>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Library directories searched by `import`, in order.
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn compile_file(&self, path: &Path) -> Result<Compiled, CompileError> {
        let mut parser = Parser::new(path)?;
        let stmts = parser.parse_module()?;
        self.run(&stmts)
    }

    pub fn compile_source(&self, source: &str, file: PathBuf) -> Result<Compiled, CompileError> {
        let mut parser = Parser::from_source(source, file)?;
        let stmts = parser.parse_module()?;
        self.run(&stmts)
    }

    fn run(&self, stmts: &[Stmt]) -> Result<Compiled, CompileError> {
        let mut evaluator = Evaluator::new(self.search_paths.clone());
        for stmt in stmts {
            evaluator.eval_stmt(ROOT, stmt)?;
        }
        evaluator.finish()
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// The result of a successful compilation: the object graph plus the scope
/// tree it was evaluated in.
#[derive(Debug)]
pub struct Compiled {
    pub model: Model,
    pub ctx: ContextTree,
}

impl Compiled {
    /// A value bound at the top level of the entry file.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self.ctx.get(ROOT, name) {
            Some(Binding::Value(value)) => Some(value),
            _ => None,
        }
    }
}

/// A resource part-way through construction; `self.<prop>` assignments in
/// the running constructor land here.
struct PendingResource {
    def: Arc<ResourceDefinition>,
    properties: IndexMap<String, Value>,
}

/// What an expression can evaluate to: a value, or one of the compile-time
/// callables and namespaces.
enum Object {
    Value(Value),
    Type(Arc<Type>),
    ResourceDef(Arc<ResourceDefinition>),
    Constructor(Arc<ResourceDefinition>, Arc<ConstructorDefinition>),
    Typedef(Arc<TypedefDefinition>),
    Plugin(Arc<crate::defs::PluginDefinition>),
    Decorator(Arc<DecoratorDefinition>),
    Module(ScopeId),
    SelfRef(usize),
}

impl Object {
    fn from_binding(binding: Binding) -> Self {
        match binding {
            Binding::Value(v) => Self::Value(v),
            Binding::Type(t) => Self::Type(t),
            Binding::ResourceDef(d) => Self::ResourceDef(d),
            Binding::Typedef(t) => Self::Typedef(t),
            Binding::Plugin(p) => Self::Plugin(p),
            Binding::Decorator(d) => Self::Decorator(d),
            Binding::Module(m) => Self::Module(m),
            Binding::SelfRef(depth) => Self::SelfRef(depth),
        }
    }

    fn into_value(self, span: &Span) -> Result<Value, CompileError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Type(ty) => Err(CompileError::compilation(
                format!("Type '{}' cannot be used as a value.", ty.name),
                Some(span.clone()),
            )),
            Self::ResourceDef(def) => Err(CompileError::compilation(
                format!("Resource type '{}' cannot be used as a value.", def.name),
                Some(span.clone()),
            )),
            Self::SelfRef(_) => Err(CompileError::compilation(
                "'self' can only be used for property access.",
                Some(span.clone()),
            )),
            _ => Err(CompileError::compilation(
                "This name cannot be used as a value.",
                Some(span.clone()),
            )),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Value(v) => format!("value of type {}", v.type_of().name),
            Self::Type(t) => format!("type {}", t.name),
            Self::ResourceDef(d) => format!("resource type {}", d.name),
            Self::Constructor(d, c) => format!("constructor {}.{}", d.name, c.name),
            Self::Typedef(t) => format!("typedef {}", t.name),
            Self::Plugin(p) => format!("plugin {}", p.name),
            Self::Decorator(d) => format!("decorator {}", d.name),
            Self::Module(_) => "module".to_string(),
            Self::SelfRef(_) => "self".to_string(),
        }
    }
}

struct Evaluator {
    ctx: ContextTree,
    model: Model,
    importer: Importer,
    construction: Vec<PendingResource>,
    /// Dotted name of the module currently being evaluated; the entry file
    /// is the empty string.
    module_stack: Vec<String>,
}

impl Evaluator {
    fn new(search_paths: Vec<PathBuf>) -> Self {
        let mut ctx = ContextTree::new();
        ctx.set_if_absent(
            ROOT,
            "index",
            Binding::Decorator(Arc::new(index_decorator())),
        );
        Self {
            ctx,
            model: Model::new(),
            importer: Importer::new(search_paths),
            construction: Vec::new(),
            module_stack: vec![String::new()],
        }
    }

    fn finish(mut self) -> Result<Compiled, CompileError> {
        self.model.root_values = collect_values(&self.ctx);
        Ok(Compiled {
            model: self.model,
            ctx: self.ctx,
        })
    }

    fn err(&self, reason: impl Into<String>, span: &Span) -> CompileError {
        CompileError::compilation(reason, Some(span.clone()))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn eval_stmt(&mut self, scope: ScopeId, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval_expr(scope, expr)?;
                Ok(())
            }
            StmtKind::Assign {
                target,
                annotation,
                value,
            } => self.eval_assign(scope, stmt, target, annotation.as_ref(), value),
            StmtKind::If { arms } => self.eval_if(scope, arms),
            StmtKind::For {
                var,
                var_token,
                iterable,
                body,
            } => self.eval_for(scope, var, var_token, iterable, body),
            StmtKind::Resource(def) => self.eval_resource_def(scope, stmt, def, &[]),
            StmtKind::Typedef {
                name,
                base,
                condition,
            } => self.eval_typedef(scope, stmt, name, base, condition.as_ref()),
            StmtKind::Enum { name, members } => {
                let ty = Type::enumeration(name.clone(), members.clone());
                self.ctx
                    .set(scope, name, Binding::Type(ty), Some(stmt.token.span.clone()))
            }
            StmtKind::Import { path } => self.eval_import(scope, path, &stmt.token.span),
            StmtKind::FromImport { path, names } => {
                self.eval_from_import(scope, path, names, &stmt.token.span)
            }
            StmtKind::PluginDef { name, params, ret } => {
                self.eval_plugin_def(scope, stmt, name, params, ret.as_ref())
            }
            StmtKind::Decorated { path, args, target } => {
                self.eval_decorated(scope, path, args, target, &stmt.token.span)
            }
        }
    }

    fn eval_assign(
        &mut self,
        scope: ScopeId,
        stmt: &Stmt,
        target: &AssignTarget,
        annotation: Option<&TypeExpr>,
        value: &Expr,
    ) -> Result<(), CompileError> {
        match target {
            AssignTarget::Name(name) => {
                let mut val = self.eval_value(scope, value)?;
                if let Some(annotation) = annotation {
                    let tyref = self.resolve_type_expr(scope, annotation)?;
                    val = self.check_assign(val, &tyref, &annotation.token.span)?;
                }
                self.ctx
                    .set(scope, name, Binding::Value(val), Some(stmt.token.span.clone()))
            }
            AssignTarget::Attribute { target, attr } => {
                let object = self.eval_expr(scope, target)?;
                let Object::SelfRef(depth) = object else {
                    return Err(self.err(
                        "Properties can only be assigned on 'self' inside a constructor.",
                        &stmt.token.span,
                    ));
                };
                let mut val = self.eval_value(scope, value)?;
                if let Some(annotation) = annotation {
                    let tyref = self.resolve_type_expr(scope, annotation)?;
                    val = self.check_assign(val, &tyref, &annotation.token.span)?;
                }
                self.assign_self_property(depth, attr, val, &stmt.token.span)
            }
        }
    }

    fn eval_if(&mut self, scope: ScopeId, arms: &[IfArm]) -> Result<(), CompileError> {
        for arm in arms {
            let taken = match &arm.guard {
                Some(guard) => self.eval_value(scope, guard)?.truthy(),
                None => true,
            };
            if taken {
                let block = self.ctx.push_scope("<if>", Some(scope));
                for stmt in &arm.body {
                    self.eval_stmt(block, stmt)?;
                }
                break;
            }
        }
        Ok(())
    }

    fn eval_for(
        &mut self,
        scope: ScopeId,
        var: &str,
        var_token: &Token,
        iterable: &Expr,
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        let iterated = self.eval_value(scope, iterable)?;
        let items: Vec<Value> = match iterated {
            Value::List(elements) => elements,
            Value::Dict(entries) => entries.keys().map(key_to_value).collect(),
            other => {
                return Err(self.err(
                    format!("Object of type {} is not iterable.", other.type_of().name),
                    &iterable.token.span,
                ))
            }
        };

        for item in items {
            let block = self.ctx.push_scope("<for>", Some(scope));
            self.ctx.set(
                block,
                var,
                Binding::Value(item),
                Some(var_token.span.clone()),
            )?;
            for stmt in body {
                self.eval_stmt(block, stmt)?;
            }
        }
        Ok(())
    }

    fn eval_typedef(
        &mut self,
        scope: ScopeId,
        stmt: &Stmt,
        name: &str,
        base: &TypeExpr,
        condition: Option<&Expr>,
    ) -> Result<(), CompileError> {
        let base_ref = self.resolve_type_expr(scope, base)?;
        let ty = Type::refined(name, base_ref.ty());
        let definition = Arc::new(TypedefDefinition {
            name: name.to_string(),
            ty,
            base: base_ref,
            condition: condition.cloned(),
            scope,
        });
        self.ctx.set(
            scope,
            name,
            Binding::Typedef(definition),
            Some(stmt.token.span.clone()),
        )
    }

    fn eval_plugin_def(
        &mut self,
        scope: ScopeId,
        stmt: &Stmt,
        name: &str,
        params: &[PluginParam],
        _ret: Option<&TypeExpr>,
    ) -> Result<(), CompileError> {
        let module = self
            .module_stack
            .last()
            .cloned()
            .unwrap_or_default();
        let plugin = self
            .importer
            .native(&module)
            .and_then(|native| native.plugins.iter().find(|p| p.name == name))
            .cloned()
            .ok_or_else(|| {
                self.err(
                    format!("No host plugin named '{name}' is registered for this module."),
                    &stmt.token.span,
                )
            })?;
        if plugin.params.len() != params.len() {
            return Err(self.err(
                format!(
                    "Plugin '{}' takes {} parameters but the declaration lists {}.",
                    name,
                    plugin.params.len(),
                    params.len()
                ),
                &stmt.token.span,
            ));
        }
        self.ctx.set(
            scope,
            name,
            Binding::Plugin(plugin),
            Some(stmt.token.span.clone()),
        )
    }

    fn eval_import(
        &mut self,
        scope: ScopeId,
        path: &[String],
        span: &Span,
    ) -> Result<(), CompileError> {
        let mut dotted = String::new();
        let mut previous: Option<ScopeId> = None;
        let mut first_scope = None;

        for (i, segment) in path.iter().enumerate() {
            if i > 0 {
                dotted.push('.');
            }
            dotted.push_str(segment);

            let (module, created) = self.ctx.module_scope(&dotted, ROOT);
            if created {
                let is_last = i + 1 == path.len();
                self.load_module(&dotted, &path[..=i], module, is_last, span)?;
            }
            if let Some(parent) = previous {
                self.ctx
                    .set_if_absent(parent, segment, Binding::Module(module));
            }
            if first_scope.is_none() {
                first_scope = Some(module);
            }
            previous = Some(module);
        }

        if let Some(first) = first_scope {
            self.ctx.set_if_absent(scope, &path[0], Binding::Module(first));
        }
        Ok(())
    }

    fn eval_from_import(
        &mut self,
        scope: ScopeId,
        path: &[String],
        names: &[(String, Token)],
        span: &Span,
    ) -> Result<(), CompileError> {
        let dotted = path.join(".");
        let (module, created) = self.ctx.module_scope(&dotted, ROOT);
        if created {
            self.load_module(&dotted, path, module, true, span)?;
        }

        for (name, token) in names {
            let binding = self.ctx.get_local(module, name).ok_or_else(|| {
                self.err(
                    format!("Module '{dotted}' has no member '{name}'."),
                    &token.span,
                )
            })?;
            self.ctx.set(scope, name, binding, Some(token.span.clone()))?;
        }
        Ok(())
    }

    /// Populates a freshly created module scope, either from the native
    /// registry or by compiling the resolved source file into it.
    fn load_module(
        &mut self,
        dotted: &str,
        path: &[String],
        module: ScopeId,
        required: bool,
        span: &Span,
    ) -> Result<(), CompileError> {
        if let Some(native) = self.importer.native(dotted) {
            let plugins = native.plugins.clone();
            let children = native.children.clone();
            for plugin in plugins {
                let name = plugin.name.clone();
                self.ctx.set_if_absent(module, &name, Binding::Plugin(plugin));
            }
            for child_dotted in children {
                let segment = child_dotted
                    .rsplit('.')
                    .next()
                    .unwrap_or(child_dotted.as_str())
                    .to_string();
                let (child, created) = self.ctx.module_scope(&child_dotted, ROOT);
                if created {
                    let child_path: Vec<String> =
                        child_dotted.split('.').map(str::to_string).collect();
                    self.load_module(&child_dotted, &child_path, child, true, span)?;
                }
                self.ctx
                    .set_if_absent(module, &segment, Binding::Module(child));
            }
            return Ok(());
        }

        let Some(file) = self.importer.resolve(path) else {
            if required {
                return Err(self.err(format!("Could not find module '{dotted}'."), span));
            }
            // A bare namespace segment on the way to a real module.
            return Ok(());
        };

        let mut parser = Parser::new(&file)?;
        let stmts = parser.parse_module()?;
        self.module_stack.push(dotted.to_string());
        let result = stmts
            .iter()
            .try_for_each(|stmt| self.eval_stmt(module, stmt));
        self.module_stack.pop();
        result
    }

    fn eval_decorated(
        &mut self,
        scope: ScopeId,
        path: &[String],
        args: &[Expr],
        target: &Stmt,
        span: &Span,
    ) -> Result<(), CompileError> {
        let object = self.resolve_dotted(scope, path, span)?;
        let Object::Decorator(decorator) = object else {
            return Err(self.err(
                format!("'{}' is not a decorator.", path.join(".")),
                span,
            ));
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_value(scope, arg)?);
        }

        match &target.kind {
            StmtKind::Resource(def) => {
                self.eval_resource_def(scope, target, def, &[(decorator, values, span.clone())])
            }
            _ => Err(self.err(
                "Decorators can only be applied to resource definitions.",
                span,
            )),
        }
    }

    #[allow(clippy::type_complexity)]
    fn eval_resource_def(
        &mut self,
        scope: ScopeId,
        stmt: &Stmt,
        def_stmt: &ResourceDefStmt,
        decorators: &[(Arc<DecoratorDefinition>, Vec<Value>, Span)],
    ) -> Result<(), CompileError> {
        let base_def = match &def_stmt.base {
            Some(base) => match self.resolve_dotted(scope, &base.path, &base.token.span)? {
                Object::ResourceDef(def) => Some(def),
                other => {
                    return Err(self.err(
                        format!(
                            "Base of resource '{}' must be a resource type, not {}.",
                            def_stmt.name,
                            other.describe()
                        ),
                        &base.token.span,
                    ))
                }
            },
            None => None,
        };

        let ty = Type::resource(
            def_stmt.name.clone(),
            base_def.as_ref().map(|d| d.ty.clone()),
        );

        let mut properties = base_def
            .as_ref()
            .map(|d| d.properties.clone())
            .unwrap_or_default();
        let mut promises = base_def
            .as_ref()
            .map(|d| d.promises.clone())
            .unwrap_or_default();

        let mut own_names: HashSet<&str> = HashSet::new();
        for prop in &def_stmt.properties {
            if !own_names.insert(prop.name.as_str()) {
                return Err(self.err(
                    format!(
                        "Redefining property '{}' for resource type '{}' is not allowed.",
                        prop.name, def_stmt.name
                    ),
                    &prop.token.span,
                ));
            }
            let tyref = self.resolve_type_expr(scope, &prop.ty)?;
            let default = match &prop.default {
                Some(expr) => {
                    let value = self.eval_value(scope, expr)?;
                    Some(self.check_assign(value, &tyref, &expr.token.span)?)
                }
                None => None,
            };
            if let Some(inherited) = properties.get(&prop.name) {
                if !tyref.ty().assignable_to(&inherited.ty.ty()) {
                    return Err(self.err(
                        format!(
                            "Property '{}' of '{}' cannot widen the inherited type '{}'.",
                            prop.name,
                            def_stmt.name,
                            inherited.ty.ty().name
                        ),
                        &prop.token.span,
                    ));
                }
            }
            properties.insert(
                prop.name.clone(),
                PropertySpec {
                    name: prop.name.clone(),
                    ty: tyref,
                    default,
                    span: prop.token.span.clone(),
                },
            );
        }

        for promise in &def_stmt.promises {
            if properties.contains_key(&promise.name) || !own_names.insert(promise.name.as_str()) {
                return Err(self.err(
                    format!(
                        "Redefining property '{}' for resource type '{}' is not allowed.",
                        promise.name, def_stmt.name
                    ),
                    &promise.token.span,
                ));
            }
            let tyref = self.resolve_type_expr(scope, &promise.ty)?;
            promises.insert(promise.name.clone(), tyref.ty());
        }

        let mut constructors = IndexMap::new();
        for ctor in &def_stmt.constructors {
            let mut params = Vec::with_capacity(ctor.params.len());
            for param in &ctor.params {
                let tyref = match &param.ty {
                    Some(texpr) => Some(self.resolve_type_expr(scope, texpr)?),
                    None => None,
                };
                let default = match &param.default {
                    Some(expr) => {
                        let value = self.eval_value(scope, expr)?;
                        match &tyref {
                            Some(tyref) => {
                                Some(self.check_assign(value, tyref, &expr.token.span)?)
                            }
                            None => Some(value),
                        }
                    }
                    None => None,
                };
                params.push(ParamSpec {
                    name: param.name.clone(),
                    ty: tyref,
                    default,
                });
            }
            constructors.insert(
                ctor.name.clone(),
                Arc::new(ConstructorDefinition {
                    name: ctor.name.clone(),
                    params,
                    body: ctor.body.clone(),
                    auto: false,
                }),
            );
        }
        if !constructors.contains_key("default") {
            let params = properties
                .values()
                .map(|prop| ParamSpec {
                    name: prop.name.clone(),
                    ty: Some(prop.ty.clone()),
                    default: prop.default.clone(),
                })
                .collect();
            constructors.insert(
                "default".to_string(),
                Arc::new(ConstructorDefinition {
                    name: "default".to_string(),
                    params,
                    body: Vec::new(),
                    auto: true,
                }),
            );
        }

        let mut parts = ResourceDefinitionParts {
            name: def_stmt.name.clone(),
            property_names: properties.keys().cloned().collect(),
            index_columns: properties.keys().take(1).cloned().collect(),
        };
        for (decorator, args, span) in decorators {
            if args.len() != decorator.arg_spec.len() {
                return Err(self.err(
                    format!(
                        "Decorator '{}' expects {} arguments, but got {}.",
                        decorator.name,
                        decorator.arg_spec.len(),
                        args.len()
                    ),
                    span,
                ));
            }
            for (position, (arg, expected)) in args.iter().zip(&decorator.arg_spec).enumerate() {
                if arg.kind() != *expected {
                    return Err(self.err(
                        format!(
                            "Argument {} of decorator '{}' has the wrong type.",
                            position, decorator.name
                        ),
                        span,
                    ));
                }
            }
            (decorator.func)(&mut parts, args.as_slice(), span)?;
        }

        let definition = Arc::new(ResourceDefinition {
            name: def_stmt.name.clone(),
            ty,
            base: base_def,
            properties,
            promises,
            constructors,
            index_columns: parts.index_columns,
            scope,
        });
        self.ctx.set(
            scope,
            &def_stmt.name,
            Binding::ResourceDef(definition),
            Some(stmt.token.span.clone()),
        )
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval_value(&mut self, scope: ScopeId, expr: &Expr) -> Result<Value, CompileError> {
        let object = self.eval_expr(scope, expr)?;
        object.into_value(&expr.token.span)
    }

    fn eval_expr(&mut self, scope: ScopeId, expr: &Expr) -> Result<Object, CompileError> {
        match &expr.kind {
            ExprKind::Int(value) => Ok(Object::Value(Value::Int(*value))),
            ExprKind::Float(value) => Ok(Object::Value(Value::Float(*value))),
            ExprKind::Bool(value) => Ok(Object::Value(Value::Bool(*value))),
            ExprKind::Str(value) => Ok(Object::Value(Value::str(value.clone()))),
            ExprKind::FString(template) => {
                let value = self.interpolate_fstring(scope, template, &expr.token.span)?;
                Ok(Object::Value(value))
            }
            ExprKind::Identifier(name) => {
                // `None` is a value in expression position and a type in
                // annotations; annotations never reach this path.
                if name == "None" {
                    return Ok(Object::Value(Value::None));
                }
                self.ctx
                    .get(scope, name)
                    .map(Object::from_binding)
                    .ok_or_else(|| self.err(format!("Unknown name '{name}'."), &expr.token.span))
            }
            ExprKind::UnaryNeg(inner) => {
                let value = self.eval_value(scope, inner)?;
                let negated = match value {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| self.err("Integer overflow.", &expr.token.span))?,
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(self.err(
                            format!(
                                "Unable to negate an object of type {}.",
                                other.type_of().name
                            ),
                            &expr.token.span,
                        ))
                    }
                };
                Ok(Object::Value(negated))
            }
            ExprKind::UnaryNot(inner) => {
                let value = self.eval_value(scope, inner)?;
                Ok(Object::Value(Value::Bool(!value.truthy())))
            }
            ExprKind::BinOp { op, lhs, rhs } => self.eval_binop(scope, expr, op, lhs, rhs),
            ExprKind::List(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval_value(scope, element)?);
                }
                Ok(Object::Value(Value::List(values)))
            }
            ExprKind::Dict(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key_value = self.eval_value(scope, key_expr)?;
                    let Some(key) = steward_core::resource::dict_key_from_value(&key_value) else {
                        return Err(self.err(
                            format!(
                                "Objects of type {} cannot be used as dict keys.",
                                key_value.type_of().name
                            ),
                            &key_expr.token.span,
                        ));
                    };
                    let value = self.eval_value(scope, value_expr)?;
                    map.insert(key, value);
                }
                Ok(Object::Value(Value::Dict(map)))
            }
            ExprKind::Attribute { target, attr } => {
                let object = self.eval_expr(scope, target)?;
                self.eval_attribute(object, attr, &expr.token.span)
            }
            ExprKind::Subscript { target, index } => {
                let container = self.eval_value(scope, target)?;
                let key = self.eval_value(scope, index)?;
                self.eval_subscript(container, key, &expr.token.span)
            }
            ExprKind::Call { callee, args } => self.eval_call(scope, callee, args, &expr.token.span),
        }
    }

    fn eval_binop(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        op: &str,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Object, CompileError> {
        match op {
            "and" => {
                let lhs = self.eval_value(scope, lhs)?;
                if !lhs.truthy() {
                    return Ok(Object::Value(Value::Bool(false)));
                }
                let rhs = self.eval_value(scope, rhs)?;
                return Ok(Object::Value(Value::Bool(rhs.truthy())));
            }
            "or" => {
                let lhs = self.eval_value(scope, lhs)?;
                if lhs.truthy() {
                    return Ok(Object::Value(Value::Bool(true)));
                }
                let rhs = self.eval_value(scope, rhs)?;
                return Ok(Object::Value(Value::Bool(rhs.truthy())));
            }
            _ => {}
        }

        let lhs_value = self.eval_value(scope, lhs)?;
        let rhs_value = self.eval_value(scope, rhs)?;

        let result = if let Some(arith) = crate::ops::BinOp::from_symbol(op) {
            crate::ops::apply_arith(arith, &lhs_value, &rhs_value)
        } else {
            crate::ops::apply_comparison(op, &lhs_value, &rhs_value)
        };
        result
            .map(Object::Value)
            .map_err(|reason| self.err(reason, &expr.token.span))
    }

    fn eval_attribute(
        &mut self,
        object: Object,
        attr: &str,
        span: &Span,
    ) -> Result<Object, CompileError> {
        match object {
            Object::Module(module) => self
                .ctx
                .get_local(module, attr)
                .map(Object::from_binding)
                .ok_or_else(|| self.err(format!("Module has no member '{attr}'."), span)),
            Object::Value(Value::Resource(reference)) => {
                let instance = self.model.get(reference.id);
                if let Some(value) = instance.properties.get(attr) {
                    Ok(Object::Value(value.clone()))
                } else if let Some(slot) = instance.promises.get(attr) {
                    Ok(Object::Value(Value::Promise(slot.clone())))
                } else {
                    Err(self.err(
                        format!(
                            "Object of type {} has no property '{attr}'.",
                            instance.type_name
                        ),
                        span,
                    ))
                }
            }
            Object::SelfRef(depth) => {
                let pending = &self.construction[depth];
                pending
                    .properties
                    .get(attr)
                    .cloned()
                    .map(Object::Value)
                    .ok_or_else(|| {
                        self.err(
                            format!("Property '{attr}' has not been assigned yet."),
                            span,
                        )
                    })
            }
            Object::Type(ty) => {
                if let TypeForm::Enum(members) = &ty.form {
                    if members.iter().any(|m| m == attr) {
                        return Ok(Object::Value(Value::Enum(EnumMember {
                            enum_name: Arc::from(ty.name.as_str()),
                            member: attr.to_string(),
                        })));
                    }
                    return Err(
                        self.err(format!("Enum {} has no member '{attr}'.", ty.name), span)
                    );
                }
                Err(self.err(format!("Type {} has no member '{attr}'.", ty.name), span))
            }
            Object::ResourceDef(def) => match def.constructors.get(attr) {
                Some(ctor) => Ok(Object::Constructor(def.clone(), ctor.clone())),
                None => Err(self.err(
                    format!("Resource type {} has no constructor '{attr}'.", def.name),
                    span,
                )),
            },
            other => Err(self.err(
                format!("{} has no property '{attr}'.", other.describe()),
                span,
            )),
        }
    }

    fn eval_subscript(
        &self,
        container: Value,
        key: Value,
        span: &Span,
    ) -> Result<Object, CompileError> {
        match container {
            Value::List(elements) => {
                let Value::Int(raw) = key else {
                    return Err(self.err("List indices must be integers.", span));
                };
                let index = if raw < 0 {
                    raw + elements.len() as i64
                } else {
                    raw
                };
                usize::try_from(index)
                    .ok()
                    .and_then(|i| elements.get(i).cloned())
                    .map(Object::Value)
                    .ok_or_else(|| self.err(format!("List index {raw} out of range."), span))
            }
            Value::Dict(entries) => {
                let Some(dict_key) = steward_core::resource::dict_key_from_value(&key) else {
                    return Err(self.err(
                        format!(
                            "Objects of type {} cannot be used as dict keys.",
                            key.type_of().name
                        ),
                        span,
                    ));
                };
                entries
                    .get(&dict_key)
                    .cloned()
                    .map(Object::Value)
                    .ok_or_else(|| {
                        self.err(format!("Key '{}' not found.", dict_key.display()), span)
                    })
            }
            other => Err(self.err(
                format!(
                    "Object of type {} does not support subscripting.",
                    other.type_of().name
                ),
                span,
            )),
        }
    }

    fn eval_call(
        &mut self,
        scope: ScopeId,
        callee: &Expr,
        args: &[CallArg],
        span: &Span,
    ) -> Result<Object, CompileError> {
        let callee_obj = self.eval_expr(scope, callee)?;

        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_value(scope, &arg.value)?;
            evaluated.push((arg.name.clone(), value));
        }

        match callee_obj {
            Object::ResourceDef(def) => {
                let ctor = def.constructors.get("default").cloned().ok_or_else(|| {
                    CompileError::internal(format!(
                        "resource type {} lost its default constructor",
                        def.name
                    ))
                })?;
                let value = self.construct_resource(def, ctor, evaluated, span)?;
                Ok(Object::Value(value))
            }
            Object::Constructor(def, ctor) => {
                let value = self.construct_resource(def, ctor, evaluated, span)?;
                Ok(Object::Value(value))
            }
            Object::Typedef(typedef) => {
                if evaluated.len() != 1 || evaluated[0].0.is_some() {
                    return Err(self.err(
                        format!("Typedef '{}' takes exactly one argument.", typedef.name),
                        span,
                    ));
                }
                let value = evaluated.remove(0).1;
                let refined = self.run_typedef(typedef, value, span)?;
                Ok(Object::Value(refined))
            }
            Object::Plugin(plugin) => {
                let mut values = Vec::with_capacity(evaluated.len());
                for (name, value) in evaluated {
                    if name.is_some() {
                        return Err(self.err(
                            format!("Plugin '{}' takes positional arguments only.", plugin.name),
                            span,
                        ));
                    }
                    values.push(value);
                }
                call_plugin(&plugin, values, span).map(Object::Value)
            }
            Object::Type(ty) => {
                if evaluated.len() != 1 || evaluated[0].0.is_some() {
                    return Err(self.err(
                        format!("Conversion to {} takes exactly one argument.", ty.name),
                        span,
                    ));
                }
                let value = evaluated.remove(0).1;
                self.cast_builtin(&ty, value, span).map(Object::Value)
            }
            other => Err(self.err(format!("{} is not callable.", other.describe()), span)),
        }
    }

    fn cast_builtin(&self, ty: &Type, value: Value, span: &Span) -> Result<Value, CompileError> {
        let failed = |from: &Value| {
            self.err(
                format!(
                    "Cannot convert a value of type {} to {}.",
                    from.type_of().name,
                    ty.name
                ),
                span,
            )
        };
        match ty.name.as_str() {
            "int" => match &value {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Str(s) => s
                    .value
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| failed(&value)),
                _ => Err(failed(&value)),
            },
            "float" => match &value {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Str(s) => s
                    .value
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| failed(&value)),
                _ => Err(failed(&value)),
            },
            "bool" => Ok(Value::Bool(value.truthy())),
            "str" => match value {
                Value::Str(s) => Ok(Value::Str(s)),
                other => Ok(Value::str(other.display_string())),
            },
            "Path" => match &value {
                Value::Path(p) => Ok(Value::Path(p.clone())),
                Value::Str(s) => Ok(Value::Path(PathBuf::from(&s.value))),
                _ => Err(failed(&value)),
            },
            _ => Err(self.err(format!("Type {} is not callable.", ty.name), span)),
        }
    }

    // ------------------------------------------------------------------
    // Types, typedefs and construction
    // ------------------------------------------------------------------

    fn resolve_type_expr(
        &mut self,
        scope: ScopeId,
        texpr: &TypeExpr,
    ) -> Result<TypeRef, CompileError> {
        if texpr.path.len() == 1 {
            match texpr.path[0].as_str() {
                "list" => {
                    let [element] = texpr.args.as_slice() else {
                        return Err(self.err(
                            "list[...] takes exactly one type argument.",
                            &texpr.token.span,
                        ));
                    };
                    let inner = self.resolve_type_expr(scope, element)?;
                    return Ok(TypeRef::Plain(Type::list(inner.ty())));
                }
                "dict" => {
                    let [key, value] = texpr.args.as_slice() else {
                        return Err(self.err(
                            "dict[...] takes exactly two type arguments.",
                            &texpr.token.span,
                        ));
                    };
                    let key = self.resolve_type_expr(scope, key)?;
                    let value = self.resolve_type_expr(scope, value)?;
                    return Ok(TypeRef::Plain(Type::dict(key.ty(), value.ty())));
                }
                "Optional" => {
                    let [inner] = texpr.args.as_slice() else {
                        return Err(self.err(
                            "Optional[...] takes exactly one type argument.",
                            &texpr.token.span,
                        ));
                    };
                    let inner = self.resolve_type_expr(scope, inner)?;
                    return Ok(TypeRef::Plain(Type::optional(inner.ty())));
                }
                _ => {}
            }
        }

        if !texpr.args.is_empty() {
            return Err(self.err(
                format!("Type '{}' takes no type arguments.", texpr.path.join(".")),
                &texpr.token.span,
            ));
        }

        match self.resolve_dotted(scope, &texpr.path, &texpr.token.span)? {
            Object::Type(ty) => Ok(TypeRef::Plain(ty)),
            Object::Typedef(td) => Ok(TypeRef::Typedef(td)),
            Object::ResourceDef(def) => Ok(TypeRef::Plain(def.ty.clone())),
            other => Err(self.err(
                format!("'{}' is not a type ({}).", texpr.path.join("."), other.describe()),
                &texpr.token.span,
            )),
        }
    }

    fn resolve_dotted(
        &mut self,
        scope: ScopeId,
        path: &[String],
        span: &Span,
    ) -> Result<Object, CompileError> {
        let mut object = self
            .ctx
            .get(scope, &path[0])
            .map(Object::from_binding)
            .ok_or_else(|| self.err(format!("Unknown name '{}'.", path[0]), span))?;
        for segment in &path[1..] {
            object = self.eval_attribute(object, segment, span)?;
        }
        Ok(object)
    }

    /// Type-checks an assignment against a resolved annotation, running a
    /// typedef's refinement when the annotation names one.
    fn check_assign(
        &mut self,
        value: Value,
        tyref: &TypeRef,
        span: &Span,
    ) -> Result<Value, CompileError> {
        match tyref {
            TypeRef::Plain(ty) => {
                if value.fits(ty) {
                    Ok(value)
                } else {
                    Err(self.err(
                        format!(
                            "Expected a value of type {}, but got {}.",
                            ty.name,
                            value.type_of().name
                        ),
                        span,
                    ))
                }
            }
            TypeRef::Typedef(td) => self.run_typedef(td.clone(), value, span),
        }
    }

    /// Casts a value through a typedef: the base accepts it first (inner
    /// refinements run first when typedefs compose), then the condition
    /// must hold with `self` bound to the value.
    fn run_typedef(
        &mut self,
        typedef: Arc<TypedefDefinition>,
        value: Value,
        span: &Span,
    ) -> Result<Value, CompileError> {
        let value = match &typedef.base {
            TypeRef::Plain(base) => {
                if !value.fits(base) {
                    return Err(self.err(
                        format!(
                            "Type '{}' requires '{}' but was passed '{}'.",
                            typedef.name,
                            base.name,
                            value.type_of().name
                        ),
                        span,
                    ));
                }
                value
            }
            TypeRef::Typedef(inner) => self.run_typedef(inner.clone(), value, span)?,
        };

        if let Some(condition) = typedef.condition.clone() {
            let block = self
                .ctx
                .push_scope(format!("{}-typedef", typedef.name), Some(typedef.scope));
            self.ctx
                .set(block, "self", Binding::Value(value.clone()), None)?;
            let outcome = self.eval_value(block, &condition)?;
            if !outcome.truthy() {
                return Err(self.err(
                    format!(
                        "Value '{}' did not meet the typedef condition for '{}'.",
                        value.display_string(),
                        typedef.name
                    ),
                    span,
                ));
            }
        }
        Ok(value)
    }

    fn construct_resource(
        &mut self,
        def: Arc<ResourceDefinition>,
        ctor: Arc<ConstructorDefinition>,
        args: Vec<(Option<String>, Value)>,
        span: &Span,
    ) -> Result<Value, CompileError> {
        // Split positional from keyword arguments.
        let mut positional = Vec::new();
        let mut keyword: IndexMap<String, Value> = IndexMap::new();
        for (name, value) in args {
            match name {
                Some(name) => {
                    if keyword.insert(name.clone(), value).is_some() {
                        return Err(
                            self.err(format!("Duplicate keyword argument '{name}'."), span)
                        );
                    }
                }
                None => {
                    if !keyword.is_empty() {
                        return Err(self.err(
                            "Positional arguments may not follow keyword arguments.",
                            span,
                        ));
                    }
                    positional.push(value);
                }
            }
        }
        if positional.len() > ctor.params.len() {
            return Err(self.err(
                format!(
                    "Constructor {}.{} expects at most {} arguments, but got {}.",
                    def.name,
                    ctor.name,
                    ctor.params.len(),
                    positional.len()
                ),
                span,
            ));
        }

        let mut positional = positional.into_iter();
        let mut bound: IndexMap<String, Value> = IndexMap::new();
        for param in &ctor.params {
            let value = if let Some(value) = positional.next() {
                if keyword.contains_key(&param.name) {
                    return Err(self.err(
                        format!("Argument '{}' was passed twice.", param.name),
                        span,
                    ));
                }
                value
            } else if let Some(value) = keyword.shift_remove(&param.name) {
                value
            } else if let Some(default) = &param.default {
                default.clone()
            } else {
                return Err(self.err(
                    format!(
                        "Constructor {}.{} is missing the argument '{}'.",
                        def.name, ctor.name, param.name
                    ),
                    span,
                ));
            };
            let value = match &param.ty {
                Some(tyref) => self.check_assign(value, tyref, span)?,
                None => value,
            };
            bound.insert(param.name.clone(), value);
        }
        if let Some(unknown) = keyword.keys().next() {
            return Err(self.err(
                format!(
                    "Constructor {}.{} has no parameter '{}'.",
                    def.name, ctor.name, unknown
                ),
                span,
            ));
        }

        let depth = self.construction.len();
        self.construction.push(PendingResource {
            def: def.clone(),
            properties: IndexMap::new(),
        });

        if ctor.auto {
            for (name, value) in bound {
                self.assign_self_property(depth, &name, value, span)?;
            }
        } else {
            let ctor_scope = self
                .ctx
                .push_scope(format!("{}.{}", def.name, ctor.name), Some(def.scope));
            self.ctx.set(ctor_scope, "self", Binding::SelfRef(depth), None)?;
            for (name, value) in bound {
                self.ctx
                    .set(ctor_scope, &name, Binding::Value(value), Some(span.clone()))?;
            }
            for stmt in &ctor.body {
                self.eval_stmt(ctor_scope, stmt)?;
            }
        }

        let pending = self
            .construction
            .pop()
            .ok_or_else(|| CompileError::internal("construction stack underflow"))?;
        let mut properties = pending.properties;

        for (name, spec) in &def.properties {
            if !properties.contains_key(name) {
                match &spec.default {
                    Some(default) => {
                        properties.insert(name.clone(), default.clone());
                    }
                    None => {
                        return Err(self.err(
                            format!(
                                "Missing required property '{}' for resource '{}'.",
                                name, def.name
                            ),
                            span,
                        ))
                    }
                }
            }
        }

        let mut column_values = Vec::with_capacity(def.index_columns.len());
        for column in &def.index_columns {
            let value = properties.get(column).ok_or_else(|| {
                CompileError::internal(format!(
                    "index column '{}' missing on resource '{}'",
                    column, def.name
                ))
            })?;
            column_values.push(value);
        }
        let index = format_index(&def.name, &column_values);

        // Two constructions with the same index are the same instance.
        if let Some(id) = self.model.lookup(&index) {
            let existing = self.model.get(id);
            return Ok(Value::Resource(ResourceRef {
                id,
                index: existing.index.clone(),
                type_name: existing.type_name.clone(),
                ty: existing.ty.clone(),
            }));
        }

        let index: Arc<str> = Arc::from(index.as_str());
        let mut promises = IndexMap::new();
        for (name, ty) in &def.promises {
            promises.insert(
                name.clone(),
                Arc::new(PromiseSlot::new(name.clone(), ty.clone(), index.clone())),
            );
        }

        let type_name: Arc<str> = Arc::from(def.name.as_str());
        let id = self.model.insert(
            type_name.clone(),
            def.ty.clone(),
            index.clone(),
            properties,
            promises,
        );
        Ok(Value::Resource(ResourceRef {
            id,
            index,
            type_name,
            ty: def.ty.clone(),
        }))
    }

    fn assign_self_property(
        &mut self,
        depth: usize,
        name: &str,
        value: Value,
        span: &Span,
    ) -> Result<(), CompileError> {
        let def = self.construction[depth].def.clone();
        let Some(spec) = def.properties.get(name) else {
            return Err(self.err(
                format!("Resource '{}' has no property '{}'.", def.name, name),
                span,
            ));
        };
        if self.construction[depth].properties.contains_key(name) {
            return Err(self.err(
                format!(
                    "Attempted to reassign property '{}' of resource '{}'.",
                    name, def.name
                ),
                span,
            ));
        }
        let value = self.check_assign(value, &spec.ty, span)?;
        self.construction[depth].properties.insert(name.to_string(), value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // F-strings
    // ------------------------------------------------------------------

    fn interpolate_fstring(
        &mut self,
        scope: ScopeId,
        template: &str,
        span: &Span,
    ) -> Result<Value, CompileError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut depth = 1usize;
                    let mut source = String::new();
                    loop {
                        match chars.next() {
                            None => {
                                return Err(self.err("Unterminated '{' in f-string.", span));
                            }
                            Some('{') => {
                                depth += 1;
                                source.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                source.push('}');
                            }
                            Some(c) => source.push(c),
                        }
                    }
                    let expr = Parser::parse_expression_source(&source).map_err(|_| {
                        self.err(
                            format!("Invalid expression '{{{source}}}' in f-string."),
                            span,
                        )
                    })?;
                    let value = self.eval_value(scope, &expr)?;
                    out.push_str(&value.display_string());
                }
                '}' => {
                    return Err(self.err("Single '}' is not allowed in an f-string.", span));
                }
                c => out.push(c),
            }
        }

        Ok(Value::str(out))
    }
}

fn key_to_value(key: &DictKey) -> Value {
    match key {
        DictKey::Int(i) => Value::Int(*i),
        DictKey::Bool(b) => Value::Bool(*b),
        DictKey::Str(s) => Value::str(s.clone()),
        DictKey::Path(p) => Value::Path(p.clone()),
    }
}

/// Gathers the exporter's entry points: every value bound in any scope of
/// the tree, so resources constructed in module, loop and constructor
/// bodies all deploy. The exporter dedups by index, so repeats are free.
fn collect_values(ctx: &ContextTree) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for scope in 0..ctx.len() {
        for (name, binding) in ctx.bindings(ScopeId(scope)) {
            if let Binding::Value(value) = binding {
                out.push((name.clone(), value.clone()));
            }
        }
    }
    out
}
