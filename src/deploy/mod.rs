// ABOUTME: The deploy pipeline: ordered named steps over a shared per-deploy context.
// ABOUTME: Step order is fixed at startup by the wiring in main; no dynamic discovery.

mod context;
mod pipeline;
pub mod steps;

pub use context::StepContext;
pub use pipeline::Pipeline;

use crate::error::Result;
use async_trait::async_trait;

/// One named, idempotent unit of the deploy pipeline.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &mut StepContext) -> Result<()>;
}
