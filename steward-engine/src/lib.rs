//! The Steward deployment engine.
//!
//! Consumes a compiled model, lowers it into a dependency DAG of tasks and
//! drives each task's handler lifecycle concurrently while respecting
//! dependencies, failure propagation and promise resolution.

pub mod deployer;
pub mod exporter;

pub use deployer::{DeployProgress, DeployReport, Deployer};
pub use exporter::{Exporter, Task, TaskGraph, TaskId};
