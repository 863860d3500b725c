//! Scheduler and exporter tests over compiled models.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use steward_core::{EngineError, Handler, HandlerContext, HandlerRegistry, Model, Value};
use steward_engine::{Deployer, Exporter, TaskGraph};

fn compile(source: &str) -> Arc<Model> {
    let compiled = steward_dsl::Compiler::new()
        .compile_source(source, PathBuf::from("<test>"))
        .expect("compilation failed");
    Arc::new(compiled.model)
}

fn export(model: &Arc<Model>, registry: &HandlerRegistry) -> TaskGraph {
    Exporter::new(model, registry).export().expect("export failed")
}

// ----------------------------------------------------------------------
// Test handlers
// ----------------------------------------------------------------------

#[derive(Default)]
struct ResourceState {
    created: bool,
    create_called: usize,
    update_called: usize,
}

/// Per-resource counting handler. With `drift` set, `read` reports a
/// change on every pass once the resource exists, so `update` runs on
/// every subsequent deploy.
struct CountingHandler {
    drift: bool,
    state: Mutex<HashMap<String, ResourceState>>,
    create_spans: Mutex<HashMap<String, (Instant, Instant)>>,
    cleanups: AtomicUsize,
    dry_runs: AtomicUsize,
}

impl CountingHandler {
    fn new(drift: bool) -> Arc<Self> {
        Arc::new(Self {
            drift,
            state: Mutex::new(HashMap::new()),
            create_spans: Mutex::new(HashMap::new()),
            cleanups: AtomicUsize::new(0),
            dry_runs: AtomicUsize::new(0),
        })
    }

    fn create_calls(&self, index: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get(index)
            .map(|s| s.create_called)
            .unwrap_or(0)
    }

    fn update_calls(&self, index: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get(index)
            .map(|s| s.update_called)
            .unwrap_or(0)
    }

    fn total_creates(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .values()
            .map(|s| s.create_called)
            .sum()
    }

    fn create_span(&self, index: &str) -> (Instant, Instant) {
        self.create_spans.lock().unwrap()[index]
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn read(&self, ctx: &mut HandlerContext) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(ctx.index.clone()).or_default();
        if entry.created {
            ctx.deployed = true;
            if self.drift {
                ctx.add_change("stamp", serde_json::json!(entry.update_called));
            }
        }
        Ok(())
    }

    async fn create(&self, ctx: &mut HandlerContext) -> Result<(), EngineError> {
        let start = Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(ctx.index.clone()).or_default();
        entry.created = true;
        entry.create_called += 1;
        drop(state);
        self.create_spans
            .lock()
            .unwrap()
            .insert(ctx.index.clone(), (start, Instant::now()));
        ctx.deployed = true;
        Ok(())
    }

    async fn update(&self, ctx: &mut HandlerContext) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(ctx.index.clone()).or_default();
        entry.update_called += 1;
        ctx.updated = true;
        Ok(())
    }

    async fn cleanup(&self, _ctx: &mut HandlerContext) -> Result<(), EngineError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dry_run(&self, _ctx: &HandlerContext) -> Result<(), EngineError> {
        self.dry_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails its create step.
struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn create(&self, ctx: &mut HandlerContext) -> Result<(), EngineError> {
        ctx.failed = true;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

const CHAIN_SOURCE: &str = "\
resource BaseRes:
    name: str

resource MidRes:
    name: str
    base: BaseRes

resource TopRes:
    name: str
    mid: MidRes

b1 = BaseRes('b1')
b2 = BaseRes('b2')
b3 = BaseRes('b3')
m1 = MidRes('m1', b1)
m2 = MidRes('m2', b2)
m3 = MidRes('m3', b3)
t1 = TopRes('t1', m1)
t2 = TopRes('t2', m1)
";

struct Chain {
    model: Arc<Model>,
    graph: TaskGraph,
    base: Arc<CountingHandler>,
    mid: Arc<CountingHandler>,
    top: Arc<CountingHandler>,
}

fn chain_fixture() -> Chain {
    let model = compile(CHAIN_SOURCE);
    let base = CountingHandler::new(false);
    let mid = CountingHandler::new(false);
    let top = CountingHandler::new(true);

    let mut registry = HandlerRegistry::new();
    registry.register("BaseRes", base.clone());
    registry.register("MidRes", mid.clone());
    registry.register("TopRes", top.clone());

    let graph = export(&model, &registry);
    Chain {
        model,
        graph,
        base,
        mid,
        top,
    }
}

// ----------------------------------------------------------------------
// Exporter shape
// ----------------------------------------------------------------------

#[test]
fn exporter_builds_one_task_per_resource() {
    let chain = chain_fixture();
    assert_eq!(chain.graph.len(), 8);
    assert_eq!(chain.graph.deployable_count(), 8);
    assert_eq!(chain.graph.base_tasks.len(), 3);

    let m1 = chain.graph.lookup("MidRes[m1]").unwrap();
    let t1 = chain.graph.lookup("TopRes[t1]").unwrap();
    assert_eq!(chain.graph.get(t1).depends_on, vec![m1]);
    // Two tops share one mid.
    assert_eq!(chain.graph.get(m1).dependants.len(), 2);
}

#[test]
fn data_only_resources_are_transparent() {
    let source = "\
resource EndPoint:
    name: str

resource Wiring:
    name: str
    endpoint: EndPoint

resource App:
    name: str
    wiring: Wiring

a = App('a', Wiring('w', EndPoint('e')))
";
    let model = compile(source);
    let endpoint = CountingHandler::new(false);
    let app = CountingHandler::new(false);
    let mut registry = HandlerRegistry::new();
    registry.register("EndPoint", endpoint.clone());
    registry.register("App", app.clone());

    let graph = export(&model, &registry);
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.deployable_count(), 2);

    let endpoint_task = graph.lookup("EndPoint[e]").unwrap();
    let app_task = graph.lookup("App[a]").unwrap();
    // The wiring edge collapses onto the endpoint.
    assert_eq!(graph.get(app_task).depends_on, vec![endpoint_task]);
    assert_eq!(graph.get(endpoint_task).dependants, vec![app_task]);
    assert_eq!(graph.base_tasks, vec![endpoint_task]);
}

#[test]
fn exporter_detects_cycles() {
    use indexmap::IndexMap;
    use steward_core::{ResourceId, ResourceRef, Type};

    // Hand-built cyclic arena; the DSL cannot construct this, the
    // exporter must still refuse it.
    let mut model = Model::new();
    let ty = Type::resource("Knot", None);
    let a_index: Arc<str> = Arc::from("Knot[a]");
    let b_index: Arc<str> = Arc::from("Knot[b]");

    let mut a_props = IndexMap::new();
    a_props.insert(
        "peer".to_string(),
        Value::Resource(ResourceRef {
            id: ResourceId(1),
            index: b_index.clone(),
            type_name: Arc::from("Knot"),
            ty: ty.clone(),
        }),
    );
    model.insert(
        Arc::from("Knot"),
        ty.clone(),
        a_index.clone(),
        a_props,
        IndexMap::new(),
    );

    let mut b_props = IndexMap::new();
    b_props.insert(
        "peer".to_string(),
        Value::Resource(ResourceRef {
            id: ResourceId(0),
            index: a_index.clone(),
            type_name: Arc::from("Knot"),
            ty: ty.clone(),
        }),
    );
    model.insert(
        Arc::from("Knot"),
        ty.clone(),
        b_index,
        b_props,
        IndexMap::new(),
    );

    model.root_values = vec![(
        "a".to_string(),
        Value::Resource(ResourceRef {
            id: ResourceId(0),
            index: a_index,
            type_name: Arc::from("Knot"),
            ty,
        }),
    )];

    let registry = HandlerRegistry::new();
    let err = Exporter::new(&model, &registry).export().unwrap_err();
    assert!(matches!(err, EngineError::Export { .. }));
}

// ----------------------------------------------------------------------
// Scheduler behavior
// ----------------------------------------------------------------------

#[tokio::test]
async fn three_deploys_create_once_then_update_tops() {
    let chain = chain_fixture();
    let deployer = Deployer::new();

    // First deploy: every create exactly once, no updates.
    let report = deployer
        .deploy(&chain.model, &chain.graph, false)
        .await
        .unwrap();
    assert!(report.success());
    assert_eq!(report.done, 8);
    for index in ["BaseRes[b1]", "BaseRes[b2]", "BaseRes[b3]"] {
        assert_eq!(chain.base.create_calls(index), 1);
    }
    for index in ["MidRes[m1]", "MidRes[m2]", "MidRes[m3]"] {
        assert_eq!(chain.mid.create_calls(index), 1);
    }
    for index in ["TopRes[t1]", "TopRes[t2]"] {
        assert_eq!(chain.top.create_calls(index), 1);
        assert_eq!(chain.top.update_calls(index), 0);
    }

    // Second deploy: no creates, one update per top.
    let report = deployer
        .deploy(&chain.model, &chain.graph, false)
        .await
        .unwrap();
    assert!(report.success());
    assert_eq!(chain.base.total_creates(), 3);
    assert_eq!(chain.mid.total_creates(), 3);
    assert_eq!(chain.top.total_creates(), 2);
    for index in ["TopRes[t1]", "TopRes[t2]"] {
        assert_eq!(chain.top.update_calls(index), 1);
    }

    // Third deploy: one more update per top, still no creates.
    let report = deployer
        .deploy(&chain.model, &chain.graph, false)
        .await
        .unwrap();
    assert!(report.success());
    assert_eq!(chain.top.total_creates(), 2);
    for index in ["TopRes[t1]", "TopRes[t2]"] {
        assert_eq!(chain.top.update_calls(index), 2);
    }
}

#[tokio::test]
async fn edges_order_lifecycles() {
    let chain = chain_fixture();
    Deployer::new()
        .deploy(&chain.model, &chain.graph, false)
        .await
        .unwrap();

    for (base, mid, top) in [
        ("BaseRes[b1]", "MidRes[m1]", Some("TopRes[t1]")),
        ("BaseRes[b2]", "MidRes[m2]", None),
        ("BaseRes[b3]", "MidRes[m3]", None),
    ] {
        let (_, base_end) = chain.base.create_span(base);
        let (mid_start, mid_end) = chain.mid.create_span(mid);
        assert!(mid_start >= base_end, "{mid} started before {base} finished");
        if let Some(top) = top {
            let (top_start, _) = chain.top.create_span(top);
            assert!(top_start >= mid_end, "{top} started before {mid} finished");
        }
    }
}

#[tokio::test]
async fn failures_propagate_but_other_branches_continue() {
    let source = "\
resource Broken:
    name: str

resource Dependant:
    name: str
    upstream: Broken

resource Healthy:
    name: str

d = Dependant('d', Broken('x'))
h = Healthy('h')
";
    let model = compile(source);
    let healthy = CountingHandler::new(false);
    let dependant = CountingHandler::new(false);
    let mut registry = HandlerRegistry::new();
    registry.register("Broken", Arc::new(FailingHandler));
    registry.register("Dependant", dependant.clone());
    registry.register("Healthy", healthy.clone());

    let graph = export(&model, &registry);
    let report = Deployer::new().deploy(&model, &graph, false).await.unwrap();

    assert!(!report.success());
    assert_eq!(report.done, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(healthy.total_creates(), 1);
    assert_eq!(dependant.total_creates(), 0);
}

#[tokio::test]
async fn cleanup_runs_for_every_handler_backed_task() {
    let chain = chain_fixture();
    Deployer::new()
        .deploy(&chain.model, &chain.graph, false)
        .await
        .unwrap();
    let cleanups = chain.base.cleanups.load(Ordering::SeqCst)
        + chain.mid.cleanups.load(Ordering::SeqCst)
        + chain.top.cleanups.load(Ordering::SeqCst);
    assert_eq!(cleanups, 8);
}

#[tokio::test]
async fn cancellation_skips_new_tasks_but_still_cleans_up() {
    let chain = chain_fixture();
    let deployer = Deployer::new();
    deployer.cancel_handle().store(true, Ordering::SeqCst);

    let report = deployer
        .deploy(&chain.model, &chain.graph, false)
        .await
        .unwrap();
    assert_eq!(report.done, 0);
    assert_eq!(report.failed, 8);
    assert_eq!(chain.base.total_creates(), 0);
    let cleanups = chain.base.cleanups.load(Ordering::SeqCst)
        + chain.mid.cleanups.load(Ordering::SeqCst)
        + chain.top.cleanups.load(Ordering::SeqCst);
    assert_eq!(cleanups, 8);
}

#[tokio::test]
async fn dry_run_touches_every_task_without_deploying() {
    let chain = chain_fixture();
    Deployer::new()
        .dry_run(&chain.model, &chain.graph)
        .await
        .unwrap();
    let dry_runs = chain.base.dry_runs.load(Ordering::SeqCst)
        + chain.mid.dry_runs.load(Ordering::SeqCst)
        + chain.top.dry_runs.load(Ordering::SeqCst);
    assert_eq!(dry_runs, 8);
    assert_eq!(chain.base.total_creates(), 0);
}

// ----------------------------------------------------------------------
// Promises
// ----------------------------------------------------------------------

const PROMISE_SOURCE: &str = "\
resource Cert:
    name: str
    promise fingerprint: str

resource Site:
    name: str
    fp: str

s = Site('web', Cert('tls').fingerprint)
";

/// Fulfills its promise during create.
struct CertHandler {
    fulfill: bool,
}

#[async_trait]
impl Handler for CertHandler {
    async fn create(&self, ctx: &mut HandlerContext) -> Result<(), EngineError> {
        if self.fulfill {
            ctx.promise("fingerprint")
                .expect("promise slot missing")
                .set(Value::str("ok"))?;
        }
        ctx.deployed = true;
        Ok(())
    }
}

/// Records the promise value it observed.
struct SiteHandler {
    observed: Mutex<Option<Value>>,
}

#[async_trait]
impl Handler for SiteHandler {
    async fn create(&self, ctx: &mut HandlerContext) -> Result<(), EngineError> {
        *self.observed.lock().unwrap() = ctx.property("fp").cloned();
        ctx.deployed = true;
        Ok(())
    }
}

#[tokio::test]
async fn fulfilled_promises_are_visible_downstream() {
    let model = compile(PROMISE_SOURCE);
    let site = Arc::new(SiteHandler {
        observed: Mutex::new(None),
    });
    let mut registry = HandlerRegistry::new();
    registry.register("Cert", Arc::new(CertHandler { fulfill: true }));
    registry.register("Site", site.clone());

    let graph = export(&model, &registry);
    let report = Deployer::new().deploy(&model, &graph, false).await.unwrap();

    assert!(report.success());
    assert_eq!(*site.observed.lock().unwrap(), Some(Value::str("ok")));
}

#[tokio::test]
async fn unfulfilled_promises_fail_the_reader() {
    let model = compile(PROMISE_SOURCE);
    let site = Arc::new(SiteHandler {
        observed: Mutex::new(None),
    });
    let mut registry = HandlerRegistry::new();
    registry.register("Cert", Arc::new(CertHandler { fulfill: false }));
    registry.register("Site", site.clone());

    let graph = export(&model, &registry);
    let report = Deployer::new().deploy(&model, &graph, false).await.unwrap();

    assert!(!report.success());
    assert_eq!(report.done, 1);
    assert_eq!(report.failed, 1);
    // The site handler never ran.
    assert_eq!(*site.observed.lock().unwrap(), None);
}

#[tokio::test]
async fn promises_set_exactly_once() {
    let model = compile(PROMISE_SOURCE);
    let cert = model.get(model.lookup("Cert[tls]").unwrap());
    let slot = cert.promises.get("fingerprint").unwrap();
    slot.set(Value::str("first")).unwrap();
    let err = slot.set(Value::str("second")).unwrap_err();
    assert!(matches!(err, EngineError::Deploy { .. }));
}
