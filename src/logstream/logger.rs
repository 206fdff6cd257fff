// ABOUTME: Per-deploy logger facade used by pipeline steps.
// ABOUTME: Each line is timestamped and handed to a sink that fans it out.

use chrono::Local;
use std::sync::Arc;

type LineSink = dyn Fn(&str, &str) + Send + Sync;

/// Records timestamped build-log lines for one deploy. The sink typically
/// appends to the store's build log, publishes to the hub, and feeds the
/// callback batcher.
#[derive(Clone)]
pub struct DeployLogger {
    app_id: String,
    sink: Arc<LineSink>,
}

impl DeployLogger {
    pub fn new(app_id: &str, sink: impl Fn(&str, &str) + Send + Sync + 'static) -> DeployLogger {
        DeployLogger {
            app_id: app_id.to_string(),
            sink: Arc::new(sink),
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        tracing::info!(app_id = %self.app_id, "{message}");
        (self.sink)(&self.app_id, &line);
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}
