//! Wire protocol of the TCP gateway.
//!
//! Each connection speaks newline-delimited JSON: one inbound command or
//! outbound event per line. Inbound commands mirror the engine's exposed
//! operations; outbound lines are serialized
//! [`OutboundEvent`](nearserve::events::OutboundEvent)s.

use serde::Deserialize;

use nearserve::lifecycle::{Eta, Urgency};
use nearserve::session::IdentityKind;

/// An inbound command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// Binds this connection to an identity.
    #[serde(rename_all = "camelCase")]
    Register {
        identity_id: String,
        identity_kind: IdentityKind,
    },

    /// Submits a new service request.
    #[serde(rename_all = "camelCase")]
    ServiceRequest {
        request_id: String,
        user_id: String,
        category: String,
        description: String,
        #[serde(default)]
        urgency: Urgency,
        latitude: f64,
        longitude: f64,
    },

    /// Cancels an in-flight request.
    #[serde(rename_all = "camelCase")]
    CancelServiceRequest {
        request_id: String,
        user_id: String,
    },

    /// A provider's answer to a broadcast.
    #[serde(rename_all = "camelCase")]
    ProviderResponse {
        request_id: String,
        provider_id: String,
        response: ResponseKind,
        #[serde(default)]
        eta: Option<Eta>,
    },

    /// A provider's live tracking fix.
    #[serde(rename_all = "camelCase")]
    ProviderLocationUpdate {
        provider_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        accuracy_m: Option<f64>,
    },

    /// A provider toggling online/offline.
    #[serde(rename_all = "camelCase")]
    ProviderStatusUpdate {
        provider_id: String,
        is_online: bool,
    },

    /// The assigned provider marking the job done.
    #[serde(rename_all = "camelCase")]
    ServiceComplete {
        request_id: String,
        provider_id: String,
    },

    /// Asks for current engine load.
    Health,
}

/// Accept or reject, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Accept,
    Reject,
}

impl From<ResponseKind> for nearserve::engine::ResponseDecision {
    fn from(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Accept => Self::Accept,
            ResponseKind::Reject => Self::Reject,
        }
    }
}
