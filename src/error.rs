use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by the wizard, registry and export orchestration.
///
/// None of these are fatal: each leaves the session in a state it already models
/// (unchanged step, `idle` or `failed` export).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A required selection is missing; nothing was changed.
    #[error("{0}")]
    Validation(String),

    /// Export attempted without a data file or an active chart.
    #[error("{0}")]
    Precondition(String),

    #[error("an export is already running")]
    ConcurrentExport,

    /// The generation service answered with a non-success status.
    #[error("{message}")]
    Remote { status: u16, message: String },

    /// Network failure, timeout or unreadable response.
    #[error("{0}")]
    Transport(String),
}
