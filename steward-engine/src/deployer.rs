//! The deployer drives the task DAG through handler lifecycles.
//!
//! All task-state transitions happen on one dispatch loop; handler
//! lifecycles run as spawned tokio tasks and report back over an mpsc
//! completion channel, so no lock guards the scheduler state.

use crate::exporter::{TaskGraph, TaskId};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use steward_core::{EngineError, Handler, HandlerContext, Model, ResourceId, Value};
use tokio::sync::mpsc;

/// Counter shown to the operator while a run progresses.
#[derive(Debug, Clone, Copy)]
pub struct DeployProgress {
    pub total: usize,
    pub done: usize,
    pub log: bool,
}

/// What one deploy pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployReport {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
}

impl DeployReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

enum Outcome {
    Done,
    Failed(Option<EngineError>),
}

/// Cooperative scheduler over an exported task graph.
///
/// A single `Deployer` may run the same graph repeatedly; dependency
/// counters are rebuilt per pass, so a second deploy re-runs the full
/// handler lifecycle of every task.
pub struct Deployer {
    cancelled: Arc<AtomicBool>,
}

impl Deployer {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that aborts launching new lifecycles when set. In-flight
    /// handlers finish their current step; the cleanup pass still runs.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn deploy(
        &self,
        model: &Arc<Model>,
        graph: &TaskGraph,
        log_progress: bool,
    ) -> Result<DeployReport, EngineError> {
        let mut progress = DeployProgress {
            total: graph.deployable_count(),
            done: 0,
            log: log_progress,
        };
        let mut states = vec![TaskState::Pending; graph.len()];
        let mut unmet: Vec<usize> = graph.tasks.iter().map(|t| t.depends_on.len()).collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<(TaskId, Outcome)>();
        let mut in_flight = 0usize;

        for &task in &graph.base_tasks {
            self.launch(task, graph, model, &tx, &mut states, &mut in_flight);
        }

        while in_flight > 0 {
            let Some((id, outcome)) = rx.recv().await else {
                return Err(EngineError::Internal {
                    reason: "completion channel closed while tasks were in flight".to_string(),
                });
            };
            in_flight -= 1;

            match outcome {
                Outcome::Done => {
                    states[id.0] = TaskState::Done;
                    progress.done += 1;
                    if progress.log {
                        tracing::info!("{} of {} tasks done.", progress.done, progress.total);
                    }
                    for &dependant in &graph.get(id).dependants {
                        if unmet[dependant.0] > 0 {
                            unmet[dependant.0] -= 1;
                        }
                        if unmet[dependant.0] == 0 && states[dependant.0] == TaskState::Pending {
                            self.launch(dependant, graph, model, &tx, &mut states, &mut in_flight);
                        }
                    }
                }
                Outcome::Failed(error) => {
                    states[id.0] = TaskState::Failed;
                    match error {
                        Some(error) => {
                            tracing::error!(task = %graph.get(id).index, "{error}");
                        }
                        None => {
                            tracing::error!(task = %graph.get(id).index, "handler reported failure");
                        }
                    }
                    mark_dependants_skipped(graph, id, &mut states);
                }
            }
        }
        drop(tx);

        tracing::info!("Cleaning up.");
        for task in &graph.tasks {
            if let Some(handler) = &task.handler {
                // Cleanup must not trip over unfulfilled promises.
                match build_context(model, task.resource, false) {
                    Ok(mut ctx) => {
                        if let Err(error) = handler.cleanup(&mut ctx).await {
                            tracing::warn!(task = %task.index, "cleanup failed: {error}");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(task = %task.index, "cleanup skipped: {error}");
                    }
                }
            }
        }

        let failed = graph
            .tasks
            .iter()
            .filter(|t| t.handler.is_some() && states[t.id.0] != TaskState::Done)
            .count();
        Ok(DeployReport {
            total: progress.total,
            done: progress.done,
            failed,
        })
    }

    /// Side-effect-free preview: every handler-backed task gets its
    /// materialised view with promises left unresolved, no ordering edges
    /// are walked.
    pub async fn dry_run(&self, model: &Arc<Model>, graph: &TaskGraph) -> Result<(), EngineError> {
        for task in &graph.tasks {
            if let Some(handler) = &task.handler {
                let ctx = build_context(model, task.resource, false)?;
                handler.dry_run(&ctx).await?;
            }
        }
        Ok(())
    }

    fn launch(
        &self,
        id: TaskId,
        graph: &TaskGraph,
        model: &Arc<Model>,
        tx: &mpsc::UnboundedSender<(TaskId, Outcome)>,
        states: &mut [TaskState],
        in_flight: &mut usize,
    ) {
        let task = graph.get(id);
        let Some(handler) = task.handler.clone() else {
            return;
        };
        if self.cancelled.load(Ordering::Relaxed) {
            states[id.0] = TaskState::Skipped;
            return;
        }

        states[id.0] = TaskState::Running;
        *in_flight += 1;
        let model = model.clone();
        let resource = task.resource;
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = run_lifecycle(handler, model, resource).await;
            let _ = tx.send((id, outcome));
        });
    }
}

impl Default for Deployer {
    fn default() -> Self {
        Self::new()
    }
}

/// `read`, then `create` or `update`, per the handler contract. A handler
/// that neither deploys nor explains has failed.
async fn run_lifecycle(handler: Arc<dyn Handler>, model: Arc<Model>, resource: ResourceId) -> Outcome {
    let mut ctx = match build_context(&model, resource, true) {
        Ok(ctx) => ctx,
        Err(error) => return Outcome::Failed(Some(error)),
    };

    ctx.failed = false;
    if let Err(error) = handler.read(&mut ctx).await {
        return Outcome::Failed(Some(error));
    }
    if !ctx.deployed {
        if let Err(error) = handler.create(&mut ctx).await {
            return Outcome::Failed(Some(error));
        }
    } else if !ctx.changes.is_empty() {
        if let Err(error) = handler.update(&mut ctx).await {
            return Outcome::Failed(Some(error));
        }
    }

    if ctx.failed || !ctx.deployed {
        return Outcome::Failed(None);
    }
    Outcome::Done
}

/// Builds the handler context for one resource. With `resolve_promises`
/// set, promise values referenced by properties must already be fulfilled;
/// edge ordering guarantees the owner completed first, so an unfulfilled
/// one is an `UnresolvedPromiseError`.
fn build_context(
    model: &Arc<Model>,
    resource: ResourceId,
    resolve_promises: bool,
) -> Result<HandlerContext, EngineError> {
    let instance = model.get(resource);
    let view = model.materialize(resource, resolve_promises)?;

    let mut properties = IndexMap::new();
    for (name, value) in &instance.properties {
        let resolved = match value {
            Value::Promise(slot) => match slot.get() {
                Some(inner) => inner,
                None if resolve_promises => {
                    return Err(EngineError::UnresolvedPromise {
                        index: slot.owner_index.to_string(),
                        promise: slot.name.clone(),
                    })
                }
                None => value.clone(),
            },
            other => other.clone(),
        };
        properties.insert(name.clone(), resolved);
    }

    Ok(HandlerContext::new(
        resource,
        instance.index.to_string(),
        view,
        properties,
        instance.promises.clone(),
    ))
}

fn mark_dependants_skipped(graph: &TaskGraph, failed: TaskId, states: &mut [TaskState]) {
    for &dependant in &graph.get(failed).dependants {
        if states[dependant.0] == TaskState::Pending {
            states[dependant.0] = TaskState::Skipped;
            mark_dependants_skipped(graph, dependant, states);
        }
    }
}
