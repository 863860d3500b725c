//! The calling shim between DSL values and host plugins.

use crate::defs::PluginDefinition;
use std::path::PathBuf;
use std::sync::Arc;
use steward_core::{CompileError, Span, Type, TypeForm, Value};

/// Calls a plugin with already-evaluated arguments, enforcing its declared
/// signature on the way in and out.
pub fn call_plugin(
    plugin: &PluginDefinition,
    args: Vec<Value>,
    span: &Span,
) -> Result<Value, CompileError> {
    if args.len() != plugin.params.len() {
        return Err(CompileError::plugin(
            format!(
                "Plugin '{}' expects {} arguments but got {}.",
                plugin.name,
                plugin.params.len(),
                args.len()
            ),
            Some(span.clone()),
        ));
    }

    let mut converted = Vec::with_capacity(args.len());
    for (value, (name, expected)) in args.into_iter().zip(&plugin.params) {
        let value = convert_argument(value, expected);
        if !value.fits(expected) {
            return Err(CompileError::plugin(
                format!(
                    "Argument '{}' of plugin '{}' expects {} but got {}.",
                    name,
                    plugin.name,
                    expected.name,
                    value.type_of().name
                ),
                Some(span.clone()),
            ));
        }
        converted.push(value);
    }

    let result = (plugin.func)(&converted).map_err(|reason| {
        CompileError::plugin(
            format!("Plugin '{}' failed: {}", plugin.name, reason),
            Some(span.clone()),
        )
    })?;

    if !result.fits(&plugin.ret) {
        return Err(CompileError::plugin(
            format!(
                "Plugin '{}' declared a return type of {} but produced {}.",
                plugin.name,
                plugin.ret.name,
                result.type_of().name
            ),
            Some(span.clone()),
        ));
    }
    Ok(result)
}

/// Lossless conversions the shim performs so plugins see the host types
/// they declared: a string argument satisfies a `Path` parameter.
fn convert_argument(value: Value, expected: &Type) -> Value {
    if expected.form == TypeForm::Scalar && expected.name == "Path" {
        if let Value::Str(s) = &value {
            return Value::Path(PathBuf::from(&s.value));
        }
    }
    value
}

/// Convenience constructor for native plugin definitions.
pub fn native_plugin(
    name: &str,
    params: Vec<(&str, Arc<Type>)>,
    ret: Arc<Type>,
    func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> Arc<PluginDefinition> {
    Arc::new(PluginDefinition {
        name: name.to_string(),
        params: params
            .into_iter()
            .map(|(n, t)| (n.to_string(), t))
            .collect(),
        ret,
        func: Arc::new(func),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double() -> Arc<PluginDefinition> {
        native_plugin("double", vec![("n", Type::int())], Type::int(), |args| {
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(n * 2)),
                _ => Err("expected an int".to_string()),
            }
        })
    }

    #[test]
    fn calls_with_valid_arguments() {
        let plugin = double();
        let out = call_plugin(&plugin, vec![Value::Int(21)], &Span::synthetic()).unwrap();
        assert_eq!(out, Value::Int(42));
    }

    #[test]
    fn rejects_bad_arity_and_types() {
        let plugin = double();
        assert!(call_plugin(&plugin, vec![], &Span::synthetic()).is_err());
        assert!(call_plugin(&plugin, vec![Value::str("x")], &Span::synthetic()).is_err());
    }

    #[test]
    fn rejects_ill_typed_returns() {
        let lying = native_plugin("lying", vec![], Type::int(), |_| Ok(Value::str("nope")));
        let err = call_plugin(&lying, vec![], &Span::synthetic()).unwrap_err();
        assert!(matches!(err, CompileError::Plugin { .. }));
    }

    #[test]
    fn strings_convert_to_paths() {
        let takes_path = native_plugin("p", vec![("path", Type::path())], Type::bool(), |args| {
            Ok(Value::Bool(matches!(args[0], Value::Path(_))))
        });
        let out = call_plugin(&takes_path, vec![Value::str("/etc")], &Span::synthetic()).unwrap();
        assert_eq!(out, Value::Bool(true));
    }
}
