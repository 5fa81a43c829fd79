//! Pipeline orchestration for Magpie.
//!
//! [`StateManager`] owns the validated in-memory registry and the per-item
//! locks; [`PipelineOrchestrator`] drives every item through the phase
//! executors with bounded concurrency and records a [`RunSummary`] in the
//! run history. Progress flows out through [`EventSender`].

mod events;
mod orchestrator;
mod state;

pub use events::{EventSender, PipelineEvent};
pub use orchestrator::{ItemFailure, PipelineOrchestrator, RunSummary};
pub use state::StateManager;
