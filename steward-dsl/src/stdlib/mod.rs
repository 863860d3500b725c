//! The bundled `std` library: native modules exposed to the DSL.

mod env;
mod file;
mod regexp;

use crate::defs::PluginDefinition;
use crate::plugin::native_plugin;
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{Type, Value};

/// A module implemented in the host language rather than in DSL source.
pub struct NativeModule {
    pub name: String,
    pub plugins: Vec<Arc<PluginDefinition>>,
    /// Dotted names of submodules to load and bind alongside this module.
    pub children: Vec<String>,
}

/// All native modules, keyed by dotted path.
pub fn native_modules() -> HashMap<String, NativeModule> {
    let mut modules = HashMap::new();
    modules.insert(
        "std".to_string(),
        NativeModule {
            name: "std".to_string(),
            plugins: vec![debug_msg_plugin()],
            children: vec![
                "std.env".to_string(),
                "std.regex".to_string(),
                "std.file".to_string(),
            ],
        },
    );
    modules.insert(
        "std.env".to_string(),
        NativeModule {
            name: "std.env".to_string(),
            plugins: env::plugins(),
            children: Vec::new(),
        },
    );
    modules.insert(
        "std.regex".to_string(),
        NativeModule {
            name: "std.regex".to_string(),
            plugins: regexp::plugins(),
            children: Vec::new(),
        },
    );
    modules.insert(
        "std.file".to_string(),
        NativeModule {
            name: "std.file".to_string(),
            plugins: file::plugins(),
            children: Vec::new(),
        },
    );
    modules
}

fn debug_msg_plugin() -> Arc<PluginDefinition> {
    native_plugin(
        "debug_msg",
        vec![("msg", Type::str())],
        Type::none(),
        |args| {
            let Value::Str(msg) = &args[0] else {
                return Err("debug_msg expects a string".to_string());
            };
            tracing::debug!(target: "steward::model", "{}", msg.value);
            Ok(Value::None)
        },
    )
}
