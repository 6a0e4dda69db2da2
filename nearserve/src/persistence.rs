//! Best-effort mirroring to durable storage and notification delivery.
//!
//! The in-memory lifecycle store is authoritative for live behavior;
//! persistence is a mirror. Writes are spawned and their failures logged;
//! they never block or roll back an in-memory transition. The same policy
//! covers completion-code email delivery.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::completion::CompletionCode;
use crate::lifecycle::{RequestStatus, ServiceRequest};
use crate::provider::UserContact;

/// Failure in a persistence or notification collaborator.
#[derive(Debug, Error)]
#[error("upstream unavailable: {0}")]
pub struct UpstreamError(pub String);

/// Durable mirror of request state.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Records a newly created request.
    async fn save_request(&self, request: &ServiceRequest) -> Result<(), UpstreamError>;

    /// Records a status change (and whatever fields came with it).
    async fn update_status(
        &self,
        request: &ServiceRequest,
        status: RequestStatus,
    ) -> Result<(), UpstreamError>;
}

/// Context accompanying a completion-code delivery.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    pub request_id: String,
    pub service_name: String,
}

/// Delivery channel for completion codes (email in production).
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Sends the code to the requester. Best-effort.
    async fn send_completion_code(
        &self,
        contact: &UserContact,
        code: &CompletionCode,
        context: &CompletionContext,
    ) -> Result<(), UpstreamError>;
}

/// Repository that drops every write. Default when no storage is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRepository;

#[async_trait]
impl RequestRepository for NoOpRepository {
    async fn save_request(&self, _request: &ServiceRequest) -> Result<(), UpstreamError> {
        Ok(())
    }

    async fn update_status(
        &self,
        _request: &ServiceRequest,
        _status: RequestStatus,
    ) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// Notifier that drops every delivery. Default when no mailer is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNotifier;

#[async_trait]
impl CompletionNotifier for NoOpNotifier {
    async fn send_completion_code(
        &self,
        _contact: &UserContact,
        _code: &CompletionCode,
        _context: &CompletionContext,
    ) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// Spawns a save and logs any failure. Never blocks the caller.
pub fn mirror_save(repository: Arc<dyn RequestRepository>, request: ServiceRequest) {
    tokio::spawn(async move {
        if let Err(error) = repository.save_request(&request).await {
            warn!(request_id = %request.request_id, %error, "failed to mirror request creation");
        }
    });
}

/// Spawns a status update and logs any failure. Never blocks the caller.
pub fn mirror_status(
    repository: Arc<dyn RequestRepository>,
    request: ServiceRequest,
    status: RequestStatus,
) {
    tokio::spawn(async move {
        if let Err(error) = repository.update_status(&request, status).await {
            warn!(
                request_id = %request.request_id,
                %status,
                %error,
                "failed to mirror status change"
            );
        }
    });
}
