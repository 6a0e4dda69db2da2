//! Provider accept/reject resolution.
//!
//! Concurrent accepts for one request converge on the lifecycle store's
//! conditional transition; exactly one wins. Losers get an
//! `alreadyAssigned` acknowledgment on their own session and the requester
//! never hears about them. Rejects are bookkeeping only, silent to the
//! requester so a multi-candidate broadcast doesn't read as a string of
//! refusals.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::facade::DispatchEngine;
use crate::completion::CompletionCode;
use crate::error::DispatchError;
use crate::events::OutboundEvent;
use crate::geo::GeoPoint;
use crate::lifecycle::{Eta, RequestStatus, TransitionError};
use crate::persistence::{mirror_status, CompletionContext};
use crate::provider::ProviderSnapshot;
use crate::session::IdentityKind;

/// A provider's answer to a broadcast request card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseDecision {
    Accept,
    Reject,
}

/// What a provider response amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The provider won the request.
    Accepted,
    /// The rejection was recorded; the request stays open for others.
    RejectRecorded,
    /// Another provider had already won; the caller was told so.
    LostRace,
}

impl DispatchEngine {
    /// Resolves a provider's accept or reject for a request.
    ///
    /// The accept path is the engine's one race: the conditional
    /// transition from a searchable status to `Accepted` is atomic per
    /// request, so N concurrent accepts produce exactly one winner and N-1
    /// `LostRace` outcomes.
    pub async fn provider_responds(
        &self,
        request_id: &str,
        provider_id: &str,
        decision: ResponseDecision,
        eta: Option<Eta>,
    ) -> Result<ResponseOutcome, DispatchError> {
        let snapshot = self
            .profiles
            .provider_snapshot(provider_id)
            .await
            .map_err(|error| DispatchError::Upstream(error.to_string()))?
            .ok_or_else(|| DispatchError::NotFound {
                kind: "provider",
                id: provider_id.to_string(),
            })?;

        if self.lifecycle.get(request_id).is_none() {
            return Err(DispatchError::NotFound {
                kind: "request",
                id: request_id.to_string(),
            });
        }

        match decision {
            ResponseDecision::Reject => {
                self.stats
                    .rejects_recorded
                    .fetch_add(1, Ordering::Relaxed);
                debug!(request_id, provider_id, "provider rejected request");
                Ok(ResponseOutcome::RejectRecorded)
            }
            ResponseDecision::Accept => self.resolve_accept(request_id, snapshot, eta),
        }
    }

    /// Runs the conditional accept transition and the winner's follow-up.
    fn resolve_accept(
        &self,
        request_id: &str,
        snapshot: ProviderSnapshot,
        eta: Option<Eta>,
    ) -> Result<ResponseOutcome, DispatchError> {
        let provider_id = snapshot.id.clone();
        let accepted = self.lifecycle.transition(
            request_id,
            &RequestStatus::SEARCHABLE,
            RequestStatus::Accepted,
            |request| {
                request.assigned_provider_id = Some(provider_id.clone());
                request.eta = eta.clone();
                request.accepted_at = Some(Utc::now());
            },
        );

        let request = match accepted {
            Ok(request) => request,
            Err(TransitionError::Stale { current, .. }) => {
                // Lost the race. Resolved silently: tell only the loser.
                self.stats.accepts_lost.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id,
                    provider_id = %snapshot.id,
                    status = %current,
                    "late accept lost the race"
                );
                self.sessions.send_to(
                    IdentityKind::Provider,
                    &snapshot.id,
                    OutboundEvent::AlreadyAssigned {
                        request_id: request_id.to_string(),
                        message: "This request has already been assigned to another provider"
                            .to_string(),
                    },
                );
                return Ok(ResponseOutcome::LostRace);
            }
            Err(TransitionError::NotFound { request_id }) => {
                return Err(DispatchError::NotFound {
                    kind: "request",
                    id: request_id,
                });
            }
        };

        self.stats.accepts_won.fetch_add(1, Ordering::Relaxed);
        info!(
            request_id,
            provider_id = %snapshot.id,
            "request accepted"
        );

        // Further providers are no longer relevant: stop the timer and drop
        // the notified set.
        if let Some((_, token)) = self.active_searches.remove(request_id) {
            token.cancel();
        }
        self.lifecycle.clear_notified(request_id);

        let distance_km = self
            .resolver
            .resolve(&snapshot)
            .map(|location| {
                request
                    .origin
                    .distance_km(&GeoPoint::new(location.latitude, location.longitude))
            });

        self.sessions.send_to(
            IdentityKind::User,
            &request.user_id,
            OutboundEvent::ProviderAssigned {
                request_id: request_id.to_string(),
                provider: snapshot.public_info(),
                distance_km,
                eta: request.eta.clone(),
                status: RequestStatus::Accepted,
                timestamp: Utc::now(),
            },
        );
        mirror_status(
            Arc::clone(&self.repository),
            request.clone(),
            RequestStatus::Accepted,
        );

        self.dispatch_completion_code(request.request_id.clone(), request.user_id.clone());
        Ok(ResponseOutcome::Accepted)
    }

    /// Mints the completion code and hands it to the notifier. Best-effort:
    /// failures are logged, never propagated to the accept flow.
    fn dispatch_completion_code(&self, request_id: String, user_id: String) {
        let profiles = Arc::clone(&self.profiles);
        let notifier = Arc::clone(&self.notifier);
        let service_name = self
            .lifecycle
            .get(&request_id)
            .map(|request| request.category.to_string())
            .unwrap_or_default();

        tokio::spawn(async move {
            let contact = match profiles.user_contact(&user_id).await {
                Ok(Some(contact)) => contact,
                Ok(None) => {
                    warn!(
                        request_id = %request_id,
                        user_id = %user_id,
                        "no contact on file, completion code not sent"
                    );
                    return;
                }
                Err(error) => {
                    warn!(
                        request_id = %request_id,
                        %error,
                        "contact lookup failed, completion code not sent"
                    );
                    return;
                }
            };

            let code = CompletionCode::generate();
            let context = CompletionContext {
                request_id: request_id.clone(),
                service_name,
            };
            if let Err(error) = notifier
                .send_completion_code(&contact, &code, &context)
                .await
            {
                warn!(request_id = %request_id, %error, "completion code delivery failed");
            }
        });
    }
}
