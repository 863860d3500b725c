//! `std.env`: read the environment of the machine compiling the model.

use crate::defs::PluginDefinition;
use crate::plugin::native_plugin;
use indexmap::IndexMap;
use std::sync::Arc;
use steward_core::{DictKey, Type, Value};

pub fn plugins() -> Vec<Arc<PluginDefinition>> {
    vec![get(), get_secret(), secrets_file()]
}

fn read_env(args: &[Value]) -> Result<String, String> {
    let Value::Str(name) = &args[0] else {
        return Err("expected a variable name".to_string());
    };
    std::env::var(&name.value)
        .map_err(|_| format!("Environment variable {} needs to be set.", name.value))
}

fn get() -> Arc<PluginDefinition> {
    native_plugin("get", vec![("name", Type::str())], Type::str(), |args| {
        read_env(args).map(Value::str)
    })
}

/// Like `get`, but the value never renders on the command line.
fn get_secret() -> Arc<PluginDefinition> {
    native_plugin(
        "get_secret",
        vec![("name", Type::str())],
        Type::protected_str(),
        |args| read_env(args).map(Value::protected_str),
    )
}

/// Reads a `NAME=VALUE` per line secrets file into a dict of protected
/// strings.
fn secrets_file() -> Arc<PluginDefinition> {
    native_plugin(
        "secrets_file",
        vec![("path", Type::path())],
        Type::dict(Type::str(), Type::protected_str()),
        |args| {
            let Value::Path(path) = &args[0] else {
                return Err("expected a file path".to_string());
            };
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read secrets file '{}': {e}", path.display()))?;

            let mut secrets = IndexMap::new();
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Some((name, secret)) = line.split_once('=') else {
                    return Err(format!(
                        "Failed to read secrets file '{}': line without '='",
                        path.display()
                    ));
                };
                secrets.insert(
                    DictKey::Str(name.trim().to_string()),
                    Value::protected_str(secret),
                );
            }
            Ok(Value::Dict(secrets))
        },
    )
}
