//! `std.file`: read files on the machine compiling the model.

use crate::defs::PluginDefinition;
use crate::plugin::native_plugin;
use std::sync::Arc;
use steward_core::{Type, Value};

pub fn plugins() -> Vec<Arc<PluginDefinition>> {
    vec![read_file()]
}

fn read_file() -> Arc<PluginDefinition> {
    native_plugin(
        "read_file",
        vec![("path", Type::path())],
        Type::str(),
        |args| {
            let Value::Path(path) = &args[0] else {
                return Err("expected a file path".to_string());
            };
            std::fs::read_to_string(path)
                .map(Value::str)
                .map_err(|e| format!("Failed to read '{}': {e}", path.display()))
        },
    )
}
