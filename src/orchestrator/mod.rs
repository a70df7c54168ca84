//! Application-level orchestration.
//!
//! This module owns the single-flight export lifecycle, post-export processing (retrieval
//! and notices) and the intent loop that drives a session on behalf of a presentation
//! layer.

mod controller;
mod export;
mod post_process;

pub(crate) use controller::{run_controller, Intent};
pub use export::{AttemptTicket, ExportOrchestrator, ExportOutcome};
pub use post_process::ProcessedExport;
