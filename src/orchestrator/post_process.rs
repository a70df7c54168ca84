//! Post-export processing.
//!
//! Triggers retrieval of a generated file and turns the outcome into notices for
//! presentation layers.

use super::export::ExportOutcome;
use crate::engine::Retriever;
use crate::error::SessionError;
use crate::model::InfoEvent;
use tracing::{info, warn};

/// Result of post-export processing, ready for presentation layers.
#[derive(Debug)]
pub struct ProcessedExport {
    pub outcome: ExportOutcome,
    pub notices: Vec<InfoEvent>,
}

/// Open a successful export through `retriever` and describe what happened.
///
/// Retrieval problems are reported as notices; they do not change the export outcome.
pub(crate) fn process_export_completion(
    outcome: ExportOutcome,
    retriever: &dyn Retriever,
) -> ProcessedExport {
    let mut notices = Vec::new();
    match &outcome {
        ExportOutcome::Succeeded { ticket, url } => {
            info!(attempt = ticket.attempt, %url, "export succeeded");
            notices.push(InfoEvent::ExportSucceeded {
                url: url.to_string(),
            });
            if let Err(e) = retriever.retrieve(url) {
                warn!(%url, "could not start retrieval: {e:#}");
                notices.push(InfoEvent::Message(format!("Download failed to start: {e:#}")));
            }
        }
        ExportOutcome::Failed { ticket, error } => {
            match error {
                SessionError::Remote { status, message } => {
                    warn!(attempt = ticket.attempt, status, %message, "export rejected")
                }
                other => warn!(attempt = ticket.attempt, "export failed: {other}"),
            }
            notices.push(InfoEvent::ExportFailed {
                message: error.to_string(),
            });
        }
        ExportOutcome::Discarded { ticket } => {
            notices.push(InfoEvent::StaleExportDiscarded {
                attempt: ticket.attempt,
            });
        }
    }
    ProcessedExport { outcome, notices }
}
