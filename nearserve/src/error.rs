//! Error taxonomy for the dispatch engine.

use thiserror::Error;

use crate::lifecycle::RequestStatus;

/// Errors surfaced by engine operations.
///
/// A lost accept race is deliberately not here: it resolves silently into
/// an `alreadyAssigned` acknowledgment to the losing provider, never a
/// caller-facing error. No variant is ever fatal to the engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed or missing input; rejected before any lifecycle entry
    /// exists.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced request or identity does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The caller does not own the resource it is mutating.
    #[error("{actor} is not authorized to {action} request {request_id}")]
    Unauthorized {
        actor: String,
        action: &'static str,
        request_id: String,
    },

    /// Cancellation arrived after assignment or termination; nothing was
    /// changed.
    #[error("request {request_id} can no longer be cancelled (status: {status})")]
    NotCancellable {
        request_id: String,
        status: RequestStatus,
    },

    /// A request with this id already exists.
    #[error("request {0} already exists")]
    DuplicateRequest(String),

    /// A collaborator (profile store, persistence, notifier) failed.
    /// Degrades gracefully; the in-memory flow continues where the contract
    /// allows.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl DispatchError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
