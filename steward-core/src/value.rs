//! The runtime representation of DSL values.

use crate::resource::{PromiseSlot, ResourceId};
use crate::types::{Type, TypeForm};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A string value. `protected` marks secrets that must render as `***`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrValue {
    pub value: String,
    pub protected: bool,
}

impl StrValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            protected: false,
        }
    }

    pub fn protected(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            protected: true,
        }
    }
}

/// A member of a declared enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub enum_name: Arc<str>,
    pub member: String,
}

/// Reference to a resource instance in the model arena. Carries the index
/// string and type descriptor so values can render and type-check without
/// a model lookup.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub id: ResourceId,
    pub index: Arc<str>,
    pub type_name: Arc<str>,
    pub ty: Arc<Type>,
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceRef {}

/// Scalar keys permitted in dict values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    Bool(bool),
    Str(String),
    Path(PathBuf),
}

impl DictKey {
    pub fn display(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => bool_str(*b).to_string(),
            Self::Str(s) => s.clone(),
            Self::Path(p) => p.display().to_string(),
        }
    }

    pub fn type_of(&self) -> Arc<Type> {
        match self {
            Self::Int(_) => Type::int(),
            Self::Bool(_) => Type::bool(),
            Self::Str(_) => Type::str(),
            Self::Path(_) => Type::path(),
        }
    }
}

/// Discriminant used by the binary-operator dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    None,
    Int,
    Float,
    Bool,
    Str,
    Path,
    List,
    Dict,
    Resource,
    Promise,
    Enum,
}

/// A fully evaluated DSL value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(StrValue),
    Path(PathBuf),
    List(Vec<Value>),
    Dict(IndexMap<DictKey, Value>),
    Resource(ResourceRef),
    Promise(Arc<PromiseSlot>),
    Enum(EnumMember),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a.value == b.value,
            (Self::Path(a), Self::Path(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Resource(a), Self::Resource(b)) => a.id == b.id,
            (Self::Promise(a), Self::Promise(b)) => Arc::ptr_eq(a, b),
            (Self::Enum(a), Self::Enum(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(StrValue::plain(value))
    }

    pub fn protected_str(value: impl Into<String>) -> Self {
        Self::Str(StrValue::protected(value))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Bool(_) => ValueKind::Bool,
            Self::Str(_) => ValueKind::Str,
            Self::Path(_) => ValueKind::Path,
            Self::List(_) => ValueKind::List,
            Self::Dict(_) => ValueKind::Dict,
            Self::Resource(_) => ValueKind::Resource,
            Self::Promise(_) => ValueKind::Promise,
            Self::Enum(_) => ValueKind::Enum,
        }
    }

    /// The type descriptor this value carries.
    ///
    /// Container element types are derived from the first element; an empty
    /// container types as `list[None]` / `dict[None,None]`, which assignment
    /// checking treats structurally.
    pub fn type_of(&self) -> Arc<Type> {
        match self {
            Self::None => Type::none(),
            Self::Int(_) => Type::int(),
            Self::Float(_) => Type::float(),
            Self::Bool(_) => Type::bool(),
            Self::Str(s) => {
                if s.protected {
                    Type::protected_str()
                } else {
                    Type::str()
                }
            }
            Self::Path(_) => Type::path(),
            Self::List(elements) => Type::list(
                elements
                    .first()
                    .map(Value::type_of)
                    .unwrap_or_else(Type::none),
            ),
            Self::Dict(entries) => match entries.first() {
                Some((k, v)) => Type::dict(k.type_of(), v.type_of()),
                None => Type::dict(Type::none(), Type::none()),
            },
            Self::Resource(r) => r.ty.clone(),
            Self::Promise(p) => Type::promise(p.ty.clone()),
            Self::Enum(m) => Type::enumeration(m.enum_name.to_string(), Vec::new()),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Bool(b) => *b,
            Self::Str(s) => !s.value.is_empty(),
            Self::Path(_) | Self::Resource(_) | Self::Promise(_) | Self::Enum(_) => true,
            Self::List(l) => !l.is_empty(),
            Self::Dict(d) => !d.is_empty(),
        }
    }

    /// Rendering used by f-string interpolation and index computation.
    /// Protected strings never leak their contents here.
    pub fn display_string(&self) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => bool_str(*b).to_string(),
            Self::Str(s) => {
                if s.protected {
                    "***".to_string()
                } else {
                    s.value.clone()
                }
            }
            Self::Path(p) => p.display().to_string(),
            Self::List(elements) => {
                let inner: Vec<String> = elements.iter().map(Value::display_string).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Dict(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.display(), v.display_string()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Self::Resource(r) => r.index.to_string(),
            Self::Promise(p) => match p.get() {
                Some(value) => value.display_string(),
                None => format!("<promise {}>", p.name),
            },
            Self::Enum(m) => format!("{}.{}", m.enum_name, m.member),
        }
    }

    /// Checks this value against a declared type, recursing structurally
    /// into containers so empty and heterogeneous literals are judged per
    /// element rather than by a synthesised container type.
    pub fn fits(&self, target: &Type) -> bool {
        if let TypeForm::Optional(inner) = &target.form {
            return matches!(self, Value::None) || self.fits(inner);
        }

        match (self, &target.form) {
            (Value::List(elements), TypeForm::List(elem_ty)) => {
                elements.iter().all(|e| e.fits(elem_ty))
            }
            (Value::Dict(entries), TypeForm::Dict(key_ty, val_ty)) => entries
                .iter()
                .all(|(k, v)| k.type_of().assignable_to(key_ty) && v.fits(val_ty)),
            _ => self.type_of().assignable_to(target),
        }
    }
}

pub(crate) fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_strings_do_not_render() {
        let v = Value::protected_str("hunter2");
        assert_eq!(v.display_string(), "***");
    }

    #[test]
    fn equality_ignores_protection() {
        assert_eq!(Value::str("a"), Value::protected_str("a"));
    }

    #[test]
    fn list_fits_structurally() {
        let v = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(v.fits(&Type::list(Type::int())));
        assert!(!v.fits(&Type::list(Type::str())));
        assert!(Value::List(Vec::new()).fits(&Type::list(Type::str())));
    }

    #[test]
    fn optional_fits() {
        assert!(Value::None.fits(&Type::optional(Type::int())));
        assert!(Value::Int(3).fits(&Type::optional(Type::int())));
        assert!(!Value::str("x").fits(&Type::optional(Type::int())));
    }
}
