// ABOUTME: Integration tests for the pipeline engine.
// ABOUTME: Stub steps exercise ordering, failure handling, and cancellation.

use async_trait::async_trait;
use rad::config::Config;
use rad::deploy::{Pipeline, Step, StepContext};
use rad::drivers::proxy::ProxyManager;
use rad::error::{Error, Result};
use rad::logstream::Hub;
use rad::ports::PortAllocator;
use rad::state::{AppState, Status, Store};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct Fixture {
    pipeline: Pipeline,
    store: Arc<Store>,
    hub: Arc<Hub>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default_dev();
    config.paths.apps_dir = dir.path().join("apps");
    config.paths.log_dir = dir.path().join("log");
    config.proxy.enabled = false;
    config.ensure_dirs().unwrap();
    let config = Arc::new(config);

    let store = Arc::new(Store::in_memory());
    let ports = Arc::new(PortAllocator::new());
    let hub = Arc::new(Hub::new());
    let proxy = Arc::new(ProxyManager::new(
        dir.path().join("caddy"),
        config.paths.log_dir.clone(),
        "srv.reviewapps.dev".to_string(),
        false,
    ));

    let pipeline = Pipeline::new(
        Arc::clone(&config),
        Arc::clone(&store),
        ports,
        proxy,
        Arc::clone(&hub),
    );

    Fixture {
        pipeline,
        store,
        hub,
        _dir: dir,
    }
}

fn queued_app(store: &Store, app_id: &str) -> AppState {
    let state = AppState::new(app_id, "https://example.com/repo.git", "main");
    store.put(state.clone());
    state
}

/// A step that records its name into a shared trace.
struct TraceStep {
    name: &'static str,
    trace: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Step for TraceStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _ctx: &mut StepContext) -> Result<()> {
        self.trace.lock().unwrap().push(self.name);
        Ok(())
    }
}

/// A step that always fails.
struct FailingStep;

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &'static str {
        "explode"
    }

    async fn run(&self, _ctx: &mut StepContext) -> Result<()> {
        Err(Error::Tool {
            tool: "stub",
            message: "boom".to_string(),
        })
    }
}

/// Test: steps run sequentially in the order they were added.
#[tokio::test]
async fn steps_run_in_order() {
    let mut fx = fixture();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    for name in ["first", "second", "third"] {
        fx.pipeline.add_step(Box::new(TraceStep {
            name,
            trace: Arc::clone(&trace),
        }));
    }

    let state = queued_app(&fx.store, "pr-1");
    fx.pipeline
        .run(CancellationToken::new(), state, false)
        .await
        .unwrap();

    assert_eq!(*trace.lock().unwrap(), vec!["first", "second", "third"]);
}

/// Test: the first failing step aborts the run, flips the app to failed,
/// and the wrapped error names the step.
#[tokio::test]
async fn failure_stops_the_run_and_marks_failed() {
    let mut fx = fixture();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    fx.pipeline.add_step(Box::new(TraceStep {
        name: "before",
        trace: Arc::clone(&trace),
    }));
    fx.pipeline.add_step(Box::new(FailingStep));
    fx.pipeline.add_step(Box::new(TraceStep {
        name: "after",
        trace: Arc::clone(&trace),
    }));

    let state = queued_app(&fx.store, "pr-1");
    let err = fx
        .pipeline
        .run(CancellationToken::new(), state, false)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("explode"));
    assert_eq!(*trace.lock().unwrap(), vec!["before"]);

    let stored = fx.store.get("pr-1").unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert!(stored.error.contains("boom"));
}

/// Test: a cancelled token aborts before the next step and leaves the app
/// in its last status.
#[tokio::test]
async fn cancellation_aborts_without_failing_the_app() {
    let mut fx = fixture();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    fx.pipeline.add_step(Box::new(TraceStep {
        name: "never",
        trace: Arc::clone(&trace),
    }));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let state = queued_app(&fx.store, "pr-1");
    let err = fx.pipeline.run(cancel, state, false).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(trace.lock().unwrap().is_empty());
    assert_eq!(fx.store.get("pr-1").unwrap().status, Status::Queued);
}

/// Test: build-log lines reach the store and hub subscribers, and the hub
/// topic closes when the run finishes.
#[tokio::test]
async fn logs_fan_out_and_hub_closes_at_the_end() {
    let mut fx = fixture();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    fx.pipeline.add_step(Box::new(TraceStep {
        name: "only",
        trace,
    }));

    let mut sub = fx.hub.subscribe("pr-1");
    let state = queued_app(&fx.store, "pr-1");
    fx.pipeline
        .run(CancellationToken::new(), state, false)
        .await
        .unwrap();

    let mut lines = Vec::new();
    while let Some(line) = sub.rx.recv().await {
        lines.push(line);
    }
    // Channel closed => hub topic was closed at terminal status.
    assert!(lines.iter().any(|l| l.contains("step: only")));
    assert!(lines.iter().any(|l| l.contains("deploy pipeline complete")));

    let stored = fx.store.get("pr-1").unwrap();
    assert_eq!(stored.build_log.len(), lines.len());
}

/// Test: a failing step still closes the hub topic so live streams end.
#[tokio::test]
async fn hub_closes_on_failure_too() {
    let mut fx = fixture();
    fx.pipeline.add_step(Box::new(FailingStep));

    let mut sub = fx.hub.subscribe("pr-1");
    let state = queued_app(&fx.store, "pr-1");
    let _ = fx
        .pipeline
        .run(CancellationToken::new(), state, false)
        .await;

    let closed = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while sub.rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}
