//! Live transport sessions for users and providers.
//!
//! The registry maps a logical identity to the sender half of its session
//! channel. The transport layer owns the receiver and pumps events onto the
//! wire. A new registration for the same identity silently supersedes the
//! old session (last write wins); sends to a superseded or closed session
//! fail and the caller logs and skips, per the broadcast error policy.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::OutboundEvent;

/// Which side of the marketplace an identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Provider,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// Sender half of a session's event channel.
pub type EventSink = mpsc::UnboundedSender<OutboundEvent>;

/// Maps logical identities to live sessions.
///
/// Entry-level locking: operations for the same identity are serialized,
/// operations on distinct identities do not contend on a common lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<(IdentityKind, String), EventSink>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, replacing any prior one for the identity.
    ///
    /// Returns true when an old session was superseded.
    pub fn register(&self, kind: IdentityKind, identity_id: &str, sink: EventSink) -> bool {
        let superseded = self
            .sessions
            .insert((kind, identity_id.to_string()), sink)
            .is_some();
        debug!(%kind, identity_id, superseded, "session registered");
        superseded
    }

    /// Removes the identity's session, if present. Idempotent.
    pub fn remove(&self, kind: IdentityKind, identity_id: &str) -> bool {
        let removed = self
            .sessions
            .remove(&(kind, identity_id.to_string()))
            .is_some();
        if removed {
            debug!(%kind, identity_id, "session removed");
        }
        removed
    }

    /// The identity's current sink, if connected.
    pub fn sink_of(&self, kind: IdentityKind, identity_id: &str) -> Option<EventSink> {
        self.sessions
            .get(&(kind, identity_id.to_string()))
            .map(|entry| entry.clone())
    }

    /// True when the identity has a live session.
    pub fn is_connected(&self, kind: IdentityKind, identity_id: &str) -> bool {
        self.sessions.contains_key(&(kind, identity_id.to_string()))
    }

    /// Delivers an event to an identity's session.
    ///
    /// Returns false when the identity is not connected or its channel is
    /// closed; the caller decides whether that matters.
    pub fn send_to(&self, kind: IdentityKind, identity_id: &str, event: OutboundEvent) -> bool {
        match self.sink_of(kind, identity_id) {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Ids of all currently connected providers (candidate pool for radius
    /// searches).
    pub fn provider_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == IdentityKind::Provider)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    /// Connected sessions of the given kind.
    pub fn count(&self, kind: IdentityKind) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<OutboundEvent>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = sink();

        assert!(!registry.register(IdentityKind::User, "u-1", tx));
        assert!(registry.is_connected(IdentityKind::User, "u-1"));
        assert!(!registry.is_connected(IdentityKind::Provider, "u-1"));
    }

    #[test]
    fn reregistration_supersedes_old_session() {
        let registry = SessionRegistry::new();
        let (old_tx, mut old_rx) = sink();
        let (new_tx, mut new_rx) = sink();

        registry.register(IdentityKind::Provider, "p-1", old_tx);
        assert!(registry.register(IdentityKind::Provider, "p-1", new_tx));

        let event = OutboundEvent::ErrorAck {
            message: "hello".to_string(),
        };
        assert!(registry.send_to(IdentityKind::Provider, "p-1", event));
        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = sink();
        registry.register(IdentityKind::User, "u-1", tx);

        assert!(registry.remove(IdentityKind::User, "u-1"));
        assert!(!registry.remove(IdentityKind::User, "u-1"));
        assert!(!registry.is_connected(IdentityKind::User, "u-1"));
    }

    #[test]
    fn send_to_disconnected_identity_reports_failure() {
        let registry = SessionRegistry::new();
        let delivered = registry.send_to(
            IdentityKind::User,
            "ghost",
            OutboundEvent::ErrorAck {
                message: "x".to_string(),
            },
        );
        assert!(!delivered);
    }

    #[test]
    fn send_to_closed_channel_reports_failure() {
        let registry = SessionRegistry::new();
        let (tx, rx) = sink();
        registry.register(IdentityKind::User, "u-1", tx);
        drop(rx);

        let delivered = registry.send_to(
            IdentityKind::User,
            "u-1",
            OutboundEvent::ErrorAck {
                message: "x".to_string(),
            },
        );
        assert!(!delivered);
    }

    #[test]
    fn provider_ids_lists_only_providers() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        let (tx3, _rx3) = sink();
        registry.register(IdentityKind::Provider, "p-1", tx1);
        registry.register(IdentityKind::Provider, "p-2", tx2);
        registry.register(IdentityKind::User, "u-1", tx3);

        let mut ids = registry.provider_ids();
        ids.sort();
        assert_eq!(ids, vec!["p-1".to_string(), "p-2".to_string()]);
        assert_eq!(registry.count(IdentityKind::User), 1);
        assert_eq!(registry.count(IdentityKind::Provider), 2);
    }
}
