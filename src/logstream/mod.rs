// ABOUTME: Log streaming plane: build-log pub/sub, runtime file tailing,
// ABOUTME: and the per-deploy logger facade.

mod hub;
mod logger;
mod tailer;

pub use hub::{Hub, Subscription};
pub use logger::DeployLogger;
pub use tailer::Tailer;
