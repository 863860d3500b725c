//! Core data types for the Steward configuration engine.
//!
//! This crate holds everything the compiler and the deployment engine
//! share: source spans, the error taxonomy, type descriptors, the value
//! union, the resource arena with its promise slots, and the handler
//! contract.

pub mod error;
pub mod handler;
pub mod resource;
pub mod span;
pub mod types;
pub mod value;

pub use error::{CompileError, EngineError};
pub use handler::{Handler, HandlerContext, HandlerRegistry};
pub use resource::{format_index, Model, PromiseSlot, ResourceId, ResourceInstance};
pub use span::Span;
pub use types::{Type, TypeForm};
pub use value::{DictKey, EnumMember, ResourceRef, StrValue, Value, ValueKind};
