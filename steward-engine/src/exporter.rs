//! The exporter lowers a compiled model into the task DAG the deployer
//! drives.
//!
//! Every distinct resource becomes one task, keyed by its index. Resources
//! without a handler are pure data: they never schedule, and tasks that
//! reference them inherit their dependencies instead of depending on them
//! directly.

use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{EngineError, Handler, HandlerRegistry, Model, ResourceId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

/// One node of the deployment DAG.
pub struct Task {
    pub id: TaskId,
    pub resource: ResourceId,
    pub index: Arc<str>,
    pub handler: Option<Arc<dyn Handler>>,
    /// Edges to tasks that must complete first. A task referencing the
    /// same dependency through two properties carries the edge twice, and
    /// the matching entry in the dependency's `dependants` twice as well.
    pub depends_on: Vec<TaskId>,
    pub dependants: Vec<TaskId>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("index", &self.index)
            .field("handler", &self.handler.is_some())
            .field("depends_on", &self.depends_on)
            .field("dependants", &self.dependants)
            .finish()
    }
}

/// The exported DAG: one task per distinct resource, plus the initial
/// frontier of handler-backed tasks with no dependencies.
#[derive(Debug, Default)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
    by_index: HashMap<Arc<str>, TaskId>,
    pub base_tasks: Vec<TaskId>,
}

impl TaskGraph {
    pub fn get(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn lookup(&self, index: &str) -> Option<TaskId> {
        self.by_index.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks the scheduler will actually run.
    pub fn deployable_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.handler.is_some()).count()
    }
}

/// Builds the task DAG for a compiled model.
pub struct Exporter<'a> {
    model: &'a Model,
    registry: &'a HandlerRegistry,
    graph: TaskGraph,
    in_progress: Vec<Arc<str>>,
}

impl<'a> Exporter<'a> {
    pub fn new(model: &'a Model, registry: &'a HandlerRegistry) -> Self {
        Self {
            model,
            registry,
            graph: TaskGraph::default(),
            in_progress: Vec::new(),
        }
    }

    /// Walks every top-level value of the model and materialises the DAG.
    pub fn export(mut self) -> Result<TaskGraph, EngineError> {
        tracing::debug!("Constructing task dependency trees.");
        let roots: Vec<Value> = self
            .model
            .root_values
            .iter()
            .map(|(_, value)| value.clone())
            .collect();
        for value in &roots {
            self.walk_value(value)?;
        }

        self.graph.base_tasks = self
            .graph
            .tasks
            .iter()
            .filter(|t| t.handler.is_some() && t.depends_on.is_empty())
            .map(|t| t.id)
            .collect();
        Ok(self.graph)
    }

    /// Tasks referenced by one value: resources directly, the owners of
    /// promises, and everything inside containers.
    fn walk_value(&mut self, value: &Value) -> Result<Vec<TaskId>, EngineError> {
        match value {
            Value::Resource(reference) => Ok(vec![self.task_for(reference.id)?]),
            Value::Promise(slot) => match self.model.lookup(&slot.owner_index) {
                Some(owner) => Ok(vec![self.task_for(owner)?]),
                None => Err(EngineError::export(format!(
                    "promise '{}' references unknown resource '{}'",
                    slot.name, slot.owner_index
                ))),
            },
            Value::List(elements) => {
                let mut tasks = Vec::new();
                for element in elements {
                    tasks.extend(self.walk_value(element)?);
                }
                Ok(tasks)
            }
            Value::Dict(entries) => {
                let mut tasks = Vec::new();
                for entry in entries.values() {
                    tasks.extend(self.walk_value(entry)?);
                }
                Ok(tasks)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn task_for(&mut self, resource: ResourceId) -> Result<TaskId, EngineError> {
        let instance = self.model.get(resource);
        let index = instance.index.clone();

        if let Some(&existing) = self.graph.by_index.get(&index) {
            return Ok(existing);
        }
        if self.in_progress.contains(&index) {
            let start = self
                .in_progress
                .iter()
                .position(|i| *i == index)
                .unwrap_or(0);
            let mut cycle: Vec<String> = self.in_progress[start..]
                .iter()
                .map(|i| i.to_string())
                .collect();
            cycle.push(index.to_string());
            return Err(EngineError::export(format!(
                "resource dependency cycle: {}",
                cycle.join(" -> ")
            )));
        }

        self.in_progress.push(index.clone());
        let properties: Vec<Value> = instance.properties.values().cloned().collect();
        let mut subs = Vec::new();
        for value in &properties {
            subs.extend(self.walk_value(value)?);
        }
        self.in_progress.pop();

        let handler = self.registry.get(&self.model.get(resource).type_name);
        let id = TaskId(self.graph.tasks.len());
        self.graph.tasks.push(Task {
            id,
            resource,
            index: index.clone(),
            handler,
            depends_on: Vec::new(),
            dependants: Vec::new(),
        });
        for sub in subs {
            self.link(id, sub);
        }
        self.graph.by_index.insert(index, id);
        Ok(id)
    }

    /// Wires one parent-to-dependency edge. Handler-less dependencies are
    /// transparent: the parent inherits their dependencies instead.
    fn link(&mut self, parent: TaskId, sub: TaskId) {
        let parent_has_handler = self.graph.tasks[parent.0].handler.is_some();
        if self.graph.tasks[sub.0].handler.is_some() {
            self.graph.tasks[parent.0].depends_on.push(sub);
            if parent_has_handler {
                self.graph.tasks[sub.0].dependants.push(parent);
            }
        } else {
            let inherited = self.graph.tasks[sub.0].depends_on.clone();
            for dependency in inherited {
                self.graph.tasks[parent.0].depends_on.push(dependency);
                if parent_has_handler {
                    self.graph.tasks[dependency.0].dependants.push(parent);
                }
            }
        }
    }
}
