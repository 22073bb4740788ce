//! Run orchestration: one fetch → normalize → publish pass per run, on a schedule.
//!
//! - `orchestrator` - [`Pipeline`] with its run guard and observable [`RunState`]
//! - `scheduler` - interval and on-demand triggering with graceful shutdown

mod orchestrator;
mod scheduler;

pub use orchestrator::{Pipeline, RunError, RunState, RunSummary};
pub use scheduler::{Scheduler, TriggerHandle};
