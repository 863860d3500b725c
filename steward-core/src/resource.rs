//! The compiled object graph: resource instances in an arena, addressed by
//! stable handles and deduplicated by index string.

use crate::error::EngineError;
use crate::types::Type;
use crate::value::{DictKey, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Stable handle into the model's resource arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub usize);

/// A write-once, late-bound property slot, fulfilled by the owning
/// resource's handler during deployment.
#[derive(Debug)]
pub struct PromiseSlot {
    pub name: String,
    pub ty: Arc<Type>,
    pub owner_index: Arc<str>,
    state: Mutex<Option<Value>>,
}

impl PromiseSlot {
    pub fn new(name: impl Into<String>, ty: Arc<Type>, owner_index: Arc<str>) -> Self {
        Self {
            name: name.into(),
            ty,
            owner_index,
            state: Mutex::new(None),
        }
    }

    /// Fulfills the promise. A second set and an ill-typed value both fail.
    pub fn set(&self, value: Value) -> Result<(), EngineError> {
        if !value.fits(&self.ty) {
            return Err(EngineError::deploy(format!(
                "promise '{}' of '{}' expects {} but was fulfilled with {}",
                self.name,
                self.owner_index,
                self.ty.name,
                value.type_of().name,
            )));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Internal {
                reason: "promise slot lock poisoned".to_string(),
            })?;
        if state.is_some() {
            return Err(EngineError::deploy(format!(
                "promise '{}' of '{}' was fulfilled twice",
                self.name, self.owner_index,
            )));
        }

        *state = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<Value> {
        self.state.lock().ok().and_then(|state| state.clone())
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

/// One evaluated resource: typed properties plus promise slots.
#[derive(Debug)]
pub struct ResourceInstance {
    pub id: ResourceId,
    pub type_name: Arc<str>,
    pub ty: Arc<Type>,
    pub index: Arc<str>,
    pub properties: IndexMap<String, Value>,
    pub promises: IndexMap<String, Arc<PromiseSlot>>,
}

/// The evaluated object graph. Resources live in an arena; the index map is
/// the single source of truth for deduplication.
#[derive(Debug, Default)]
pub struct Model {
    resources: Vec<ResourceInstance>,
    by_index: HashMap<Arc<str>, ResourceId>,
    /// Top-level bindings in evaluation order, the exporter's entry points.
    pub root_values: Vec<(String, Value)>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ResourceId) -> &ResourceInstance {
        &self.resources[id.0]
    }

    pub fn lookup(&self, index: &str) -> Option<ResourceId> {
        self.by_index.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceInstance> {
        self.resources.iter()
    }

    /// Registers a constructed instance under its index. The caller must
    /// have checked `lookup` first; duplicate registration is a bug.
    pub fn insert(
        &mut self,
        type_name: Arc<str>,
        ty: Arc<Type>,
        index: Arc<str>,
        properties: IndexMap<String, Value>,
        promises: IndexMap<String, Arc<PromiseSlot>>,
    ) -> ResourceId {
        let id = ResourceId(self.resources.len());
        self.by_index.insert(index.clone(), id);
        self.resources.push(ResourceInstance {
            id,
            type_name,
            ty,
            index,
            properties,
            promises,
        });
        id
    }

    /// Handler-facing view of a resource. Promises are resolved when
    /// `resolve_promises` is set; an unfulfilled one is an error then, and
    /// JSON null otherwise (dry-run). Protected strings keep their real
    /// contents here: handlers need them to deploy.
    pub fn materialize(
        &self,
        id: ResourceId,
        resolve_promises: bool,
    ) -> Result<serde_json::Value, EngineError> {
        let instance = self.get(id);
        let mut obj = serde_json::Map::new();
        for (name, value) in &instance.properties {
            obj.insert(name.clone(), self.value_to_json(value, resolve_promises)?);
        }
        for (name, slot) in &instance.promises {
            let rendered = match slot.get() {
                Some(value) => self.value_to_json(&value, resolve_promises)?,
                None => serde_json::Value::Null,
            };
            obj.insert(name.clone(), rendered);
        }
        Ok(serde_json::Value::Object(obj))
    }

    fn value_to_json(
        &self,
        value: &Value,
        resolve_promises: bool,
    ) -> Result<serde_json::Value, EngineError> {
        Ok(match value {
            Value::None => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Str(s) => serde_json::Value::from(s.value.clone()),
            Value::Path(p) => serde_json::Value::from(p.display().to_string()),
            Value::List(elements) => serde_json::Value::Array(
                elements
                    .iter()
                    .map(|e| self.value_to_json(e, resolve_promises))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(entries) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in entries {
                    obj.insert(k.display(), self.value_to_json(v, resolve_promises)?);
                }
                serde_json::Value::Object(obj)
            }
            Value::Resource(r) => self.materialize(r.id, resolve_promises)?,
            Value::Promise(slot) => match slot.get() {
                Some(inner) => self.value_to_json(&inner, resolve_promises)?,
                None if resolve_promises => {
                    return Err(EngineError::UnresolvedPromise {
                        index: slot.owner_index.to_string(),
                        promise: slot.name.clone(),
                    })
                }
                None => serde_json::Value::Null,
            },
            Value::Enum(m) => serde_json::Value::from(m.member.clone()),
        })
    }

    /// Operator-facing rendering of the whole graph, secrets redacted.
    pub fn printable(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for instance in &self.resources {
            let mut props = serde_json::Map::new();
            for (name, value) in &instance.properties {
                props.insert(
                    format!("{} [{}]", name, value.type_of().name),
                    serde_json::Value::from(value.display_string()),
                );
            }
            for (name, slot) in &instance.promises {
                let rendered = match slot.get() {
                    Some(value) => value.display_string(),
                    None => "<unfulfilled>".to_string(),
                };
                props.insert(format!("promise {}", name), serde_json::Value::from(rendered));
            }
            obj.insert(instance.index.to_string(), serde_json::Value::Object(props));
        }
        serde_json::Value::Object(obj)
    }
}

/// Builds the canonical index string for a resource: the type name plus the
/// rendered values of its index columns.
pub fn format_index(type_name: &str, column_values: &[&Value]) -> String {
    let parts: Vec<String> = column_values
        .iter()
        .map(|v| match v {
            Value::Str(s) => s.value.clone(),
            other => other.display_string(),
        })
        .collect();
    format!("{}[{}]", type_name, parts.join(","))
}

/// Keys for dicts come from scalar values only.
pub fn dict_key_from_value(value: &Value) -> Option<DictKey> {
    match value {
        Value::Int(i) => Some(DictKey::Int(*i)),
        Value::Bool(b) => Some(DictKey::Bool(*b)),
        Value::Str(s) => Some(DictKey::Str(s.value.clone())),
        Value::Path(p) => Some(DictKey::Path(p.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_set_is_write_once() {
        let slot = PromiseSlot::new("p", Type::str(), Arc::from("R[x]"));
        assert!(!slot.is_fulfilled());
        slot.set(Value::str("ok")).unwrap();
        assert!(slot.is_fulfilled());
        assert_eq!(slot.get(), Some(Value::str("ok")));
        assert!(slot.set(Value::str("again")).is_err());
    }

    #[test]
    fn promise_set_checks_type() {
        let slot = PromiseSlot::new("p", Type::str(), Arc::from("R[x]"));
        assert!(slot.set(Value::Int(3)).is_err());
    }

    #[test]
    fn index_format() {
        let v = Value::str("web-1");
        assert_eq!(format_index("Host", &[&v]), "Host[web-1]");
        let port = Value::Int(22);
        assert_eq!(format_index("Srv", &[&v, &port]), "Srv[web-1,22]");
    }

    #[test]
    fn materialize_unfulfilled_promise_reference_errors() {
        let mut model = Model::new();
        let slot = Arc::new(PromiseSlot::new("token", Type::str(), Arc::from("A[a]")));

        // A resource whose property reads another resource's promise.
        let mut properties = IndexMap::new();
        properties.insert("upstream_token".to_string(), Value::Promise(slot.clone()));
        let id = model.insert(
            Arc::from("B"),
            Type::resource("B", None),
            Arc::from("B[b]"),
            properties,
            IndexMap::new(),
        );

        // Dry-run view renders null, strict view errors.
        assert!(model.materialize(id, false).is_ok());
        let err = model.materialize(id, true).unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedPromise { .. }));

        slot.set(Value::str("ok")).unwrap();
        let view = model.materialize(id, true).unwrap();
        assert_eq!(view["upstream_token"], serde_json::json!("ok"));
    }
}
