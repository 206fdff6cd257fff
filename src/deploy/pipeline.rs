// ABOUTME: Pipeline engine: runs steps in order until the first error.
// ABOUTME: Failures flip the app to failed, fire on_failure hooks, and call back.

use super::steps::hooks::run_hooks;
use super::{Step, StepContext};
use crate::callback::{self, Client, LogPayload, StatusPayload};
use crate::config::Config;
use crate::drivers::proxy::ProxyManager;
use crate::error::{Error, Result};
use crate::logstream::{DeployLogger, Hub};
use crate::manifest::HookPhase;
use crate::ports::PortAllocator;
use crate::state::{AppState, Status, Store};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LOG_BATCH_INTERVAL: Duration = Duration::from_secs(5);

pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
    config: Arc<Config>,
    store: Arc<Store>,
    ports: Arc<PortAllocator>,
    proxy: Arc<ProxyManager>,
    hub: Arc<Hub>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        ports: Arc<PortAllocator>,
        proxy: Arc<ProxyManager>,
        hub: Arc<Hub>,
    ) -> Pipeline {
        Pipeline {
            steps: Vec::new(),
            config,
            store,
            ports,
            proxy,
            hub,
        }
    }

    pub fn add_step(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    /// Run the full pipeline for one app. `state` is the freshly stored
    /// request state; `redeploy` refreshes an existing app in place.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        state: AppState,
        redeploy: bool,
    ) -> Result<()> {
        let app_id = state.app_id.clone();

        let batcher = if state.callback_url.is_empty() {
            None
        } else {
            Some(LogBatcher::start(
                &app_id,
                &callback::logs_url(&state.callback_url),
                &self.config.api.api_key,
            ))
        };

        let logger = {
            let store = Arc::clone(&self.store);
            let hub = Arc::clone(&self.hub);
            let pending = batcher.as_ref().map(|b| Arc::clone(&b.pending));
            DeployLogger::new(&app_id, move |app_id, line| {
                store.append_log(app_id, line);
                hub.publish(app_id, line);
                if let Some(ref pending) = pending {
                    pending.lock().unwrap().push(line.to_string());
                }
            })
        };

        let mut ctx = StepContext {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            ports: Arc::clone(&self.ports),
            proxy: Arc::clone(&self.proxy),
            logger,
            state,
            app_dir: PathBuf::new(),
            repo_dir: PathBuf::new(),
            manifest: None,
            env_map: HashMap::new(),
            port: 0,
            processes: HashMap::new(),
            js_package_manager: None,
            redeploy,
        };

        if redeploy {
            ctx.logger.log(format!("starting redeploy pipeline for {app_id}"));
        } else {
            ctx.logger.log(format!("starting deploy pipeline for {app_id}"));
        }

        let result = self.run_steps(&cancel, &mut ctx).await;

        match result {
            Ok(()) => {
                ctx.logger.log(format!("deploy pipeline complete for {app_id}"));
                if let Some(batcher) = batcher {
                    batcher.stop().await;
                }
                self.hub.close(&app_id);
                Ok(())
            }
            Err(StepFailure::Cancelled) => {
                // Shutdown mid-deploy: leave the app in its last status.
                if let Some(batcher) = batcher {
                    batcher.stop().await;
                }
                self.hub.close(&app_id);
                Err(Error::Cancelled)
            }
            Err(StepFailure::Failed { step, error }) => {
                ctx.logger.log(format!("step {step} failed: {error}"));
                let _ = self
                    .store
                    .update_status(&app_id, Status::Failed, &error.to_string());

                self.run_failure_hooks(&ctx).await;

                if !ctx.state.callback_url.is_empty() {
                    ctx.logger
                        .log(format!("sending failure callback to {}", ctx.state.callback_url));
                    let client = Client::new(&self.config.api.api_key);
                    let mut payload = StatusPayload::new(&app_id, Status::Failed);
                    payload.error = Some(error.to_string());
                    client.send_status(&ctx.state.callback_url, payload).await;
                }

                if let Some(batcher) = batcher {
                    batcher.stop().await;
                }
                self.hub.close(&app_id);
                Err(error.in_step(step))
            }
        }
    }

    async fn run_steps(
        &self,
        cancel: &CancellationToken,
        ctx: &mut StepContext,
    ) -> std::result::Result<(), StepFailure> {
        for step in &self.steps {
            if cancel.is_cancelled() {
                return Err(StepFailure::Cancelled);
            }

            ctx.logger.log(format!("step: {}", step.name()));
            if let Err(error) = step.run(ctx).await {
                return Err(StepFailure::Failed {
                    step: step.name(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// on_failure hooks are best-effort: their own failures are logged and
    /// swallowed so they cannot mask the original step error.
    async fn run_failure_hooks(&self, ctx: &StepContext) {
        let Some(ref manifest) = ctx.manifest else {
            return;
        };
        let hooks = manifest.hooks_for(HookPhase::OnFailure);
        if hooks.is_empty() {
            return;
        }

        ctx.logger.log("running on_failure hooks");
        if let Err(err) = run_hooks(
            hooks,
            &ctx.repo_dir,
            &ctx.state.ruby_version,
            &ctx.env_slice(),
        )
        .await
        {
            ctx.logger.log(format!("on_failure hook error (non-fatal): {err}"));
        }
    }
}

enum StepFailure {
    Cancelled,
    Failed { step: &'static str, error: Error },
}

/// Collects build-log lines and flushes them to the callback logs URL on a
/// fixed cadence, with a final flush on stop. Owned by one pipeline run.
struct LogBatcher {
    pending: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl LogBatcher {
    fn start(app_id: &str, logs_url: &str, api_key: &str) -> LogBatcher {
        let pending: Arc<Mutex<Vec<String>>> = Arc::default();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(batch_loop(
            app_id.to_string(),
            logs_url.to_string(),
            Client::new(api_key),
            Arc::clone(&pending),
            cancel.clone(),
        ));

        LogBatcher {
            pending,
            cancel,
            worker,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.worker.await;
    }
}

async fn batch_loop(
    app_id: String,
    logs_url: String,
    client: Client,
    pending: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(LOG_BATCH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush(&app_id, &logs_url, &client, &pending).await;
            }
            _ = cancel.cancelled() => {
                flush(&app_id, &logs_url, &client, &pending).await;
                return;
            }
        }
    }
}

async fn flush(app_id: &str, logs_url: &str, client: &Client, pending: &Mutex<Vec<String>>) {
    let lines = std::mem::take(&mut *pending.lock().unwrap());
    if lines.is_empty() {
        return;
    }
    client
        .send_logs(
            logs_url,
            LogPayload {
                app_id: app_id.to_string(),
                lines,
            },
        )
        .await;
}
