//! `std.regex`: regular expression helpers.

use crate::defs::PluginDefinition;
use crate::plugin::native_plugin;
use std::sync::Arc;
use steward_core::{Type, Value};

pub fn plugins() -> Vec<Arc<PluginDefinition>> {
    vec![match_plugin()]
}

/// True when the pattern matches at the start of the subject.
fn match_plugin() -> Arc<PluginDefinition> {
    native_plugin(
        "match",
        vec![("pattern", Type::str()), ("subject", Type::str())],
        Type::bool(),
        |args| {
            let (Value::Str(pattern), Value::Str(subject)) = (&args[0], &args[1]) else {
                return Err("expected two strings".to_string());
            };
            // Anchored at the start of the subject.
            let anchored = format!(r"\A(?:{})", pattern.value);
            let regex = regex::Regex::new(&anchored)
                .map_err(|e| format!("Invalid regex '{}': {e}", pattern.value))?;
            Ok(Value::Bool(regex.is_match(&subject.value)))
        },
    )
}
