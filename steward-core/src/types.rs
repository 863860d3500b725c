//! Type descriptors for DSL values.
//!
//! Types form a DAG rooted at the scalar builtins. A descriptor records its
//! name, an optional base-type link (resource inheritance, typedef
//! refinement, `ProtectedStr` under `str`) and its structural form.

use once_cell::sync::Lazy;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeForm {
    Scalar,
    List(Arc<Type>),
    Dict(Arc<Type>, Arc<Type>),
    Optional(Arc<Type>),
    Promise(Arc<Type>),
    Resource,
    Enum(Vec<String>),
    Refined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub name: String,
    pub base: Option<Arc<Type>>,
    pub form: TypeForm,
}

static INT: Lazy<Arc<Type>> = Lazy::new(|| Type::scalar("int", None));
static FLOAT: Lazy<Arc<Type>> = Lazy::new(|| Type::scalar("float", None));
static BOOL: Lazy<Arc<Type>> = Lazy::new(|| Type::scalar("bool", None));
static STR: Lazy<Arc<Type>> = Lazy::new(|| Type::scalar("str", None));
static PROTECTED_STR: Lazy<Arc<Type>> =
    Lazy::new(|| Type::scalar("ProtectedStr", Some(STR.clone())));
static PATH: Lazy<Arc<Type>> = Lazy::new(|| Type::scalar("Path", None));
static NONE: Lazy<Arc<Type>> = Lazy::new(|| Type::scalar("None", None));

impl Type {
    fn scalar(name: &str, base: Option<Arc<Type>>) -> Arc<Type> {
        Arc::new(Type {
            name: name.to_string(),
            base,
            form: TypeForm::Scalar,
        })
    }

    pub fn int() -> Arc<Type> {
        INT.clone()
    }

    pub fn float() -> Arc<Type> {
        FLOAT.clone()
    }

    pub fn bool() -> Arc<Type> {
        BOOL.clone()
    }

    pub fn str() -> Arc<Type> {
        STR.clone()
    }

    pub fn protected_str() -> Arc<Type> {
        PROTECTED_STR.clone()
    }

    pub fn path() -> Arc<Type> {
        PATH.clone()
    }

    pub fn none() -> Arc<Type> {
        NONE.clone()
    }

    pub fn list(element: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: format!("list[{}]", element.name),
            base: None,
            form: TypeForm::List(element),
        })
    }

    pub fn dict(key: Arc<Type>, value: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: format!("dict[{},{}]", key.name, value.name),
            base: None,
            form: TypeForm::Dict(key, value),
        })
    }

    pub fn optional(inner: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: format!("Optional[{}]", inner.name),
            base: None,
            form: TypeForm::Optional(inner),
        })
    }

    pub fn promise(inner: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: format!("Promise[{}]", inner.name),
            base: None,
            form: TypeForm::Promise(inner),
        })
    }

    pub fn resource(name: impl Into<String>, base: Option<Arc<Type>>) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base,
            form: TypeForm::Resource,
        })
    }

    pub fn enumeration(name: impl Into<String>, members: Vec<String>) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base: None,
            form: TypeForm::Enum(members),
        })
    }

    /// A typedef-refined type: `name` narrows `base`.
    pub fn refined(name: impl Into<String>, base: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base: Some(base),
            form: TypeForm::Refined,
        })
    }

    /// `self` may be used where `target` is expected.
    ///
    /// Holds when the types are equal, when `self`'s base chain passes
    /// through `target`, for `Optional[T]` as `T | None`, structurally for
    /// lists and dicts, and for promises of a compatible inner type
    /// (late-bound reads).
    pub fn assignable_to(&self, target: &Type) -> bool {
        if self == target {
            return true;
        }

        if let TypeForm::Optional(inner) = &target.form {
            return self.name == "None" || self.assignable_to(inner);
        }

        match (&self.form, &target.form) {
            (TypeForm::List(a), TypeForm::List(b)) => a.assignable_to(b),
            (TypeForm::Dict(ak, av), TypeForm::Dict(bk, bv)) => {
                ak.assignable_to(bk) && av.assignable_to(bv)
            }
            (TypeForm::Promise(inner), TypeForm::Promise(expected)) => {
                inner.assignable_to(expected)
            }
            (TypeForm::Promise(inner), _) => inner.assignable_to(target),
            _ => match &self.base {
                Some(base) => base.assignable_to(target),
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_identity() {
        assert!(Type::int().assignable_to(&Type::int()));
        assert!(!Type::int().assignable_to(&Type::str()));
    }

    #[test]
    fn protected_str_narrows_str() {
        assert!(Type::protected_str().assignable_to(&Type::str()));
        assert!(!Type::str().assignable_to(&Type::protected_str()));
    }

    #[test]
    fn optional_accepts_inner_and_none() {
        let opt = Type::optional(Type::int());
        assert!(Type::int().assignable_to(&opt));
        assert!(Type::none().assignable_to(&opt));
        assert!(!Type::str().assignable_to(&opt));
    }

    #[test]
    fn resource_base_chain() {
        let base = Type::resource("Base", None);
        let child = Type::resource("Child", Some(base.clone()));
        assert!(child.assignable_to(&base));
        assert!(!base.assignable_to(&child));
    }

    #[test]
    fn list_is_structural() {
        let ints = Type::list(Type::int());
        let strs = Type::list(Type::str());
        assert!(ints.assignable_to(&Type::list(Type::int())));
        assert!(!ints.assignable_to(&strs));
    }

    #[test]
    fn promise_is_late_bound() {
        let p = Type::promise(Type::str());
        assert!(p.assignable_to(&Type::str()));
        assert!(!p.assignable_to(&Type::int()));
    }

    #[test]
    fn refined_chain() {
        let positive = Type::refined("PositiveInt", Type::int());
        assert!(positive.assignable_to(&Type::int()));
        assert!(!Type::int().assignable_to(&positive));
    }
}
