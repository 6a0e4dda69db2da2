//! The dispatch engine facade.
//!
//! Wires session events to the lifecycle store, progressive search,
//! response resolution and completion. One engine instance owns all
//! in-flight request state for the process.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stats::{EngineStats, EngineStatsSnapshot};
use crate::config::EngineConfig;
use crate::error::DispatchError;
use crate::events::OutboundEvent;
use crate::geo::{validate_coordinates, GeoPoint};
use crate::lifecycle::{
    spawn_terminated_sweeper, CreateError, LifecycleStore, RequestStatus, ServiceRequest,
    TransitionError, Urgency,
};
use crate::location::{LiveFix, LocationResolver};
use crate::persistence::{
    mirror_save, mirror_status, CompletionNotifier, RequestRepository,
};
use crate::provider::{ProfileStore, ProviderDirectory, ServiceCategory, StoreError};
use crate::search::{ActiveSearches, SearchController, SearchDeps};
use crate::session::{EventSink, IdentityKind, SessionRegistry};

/// Fields accepted for a new service request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Client-generated unique request id.
    pub request_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Requested trade, by wire name.
    pub category: String,
    /// Free-form problem description.
    pub description: String,
    /// Requester-declared urgency.
    pub urgency: Urgency,
    /// Request origin latitude.
    pub latitude: f64,
    /// Request origin longitude.
    pub longitude: f64,
}

/// Point-in-time view of engine load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub connected_users: usize,
    pub connected_providers: usize,
    pub active_requests: usize,
    pub live_searches: usize,
}

/// Entry point wiring session events to the dispatch components.
///
/// All shared state lives behind per-entry locks; operations on distinct
/// requests or identities proceed in parallel, while each request's status
/// transitions are totally ordered through the lifecycle store.
pub struct DispatchEngine {
    pub(super) config: EngineConfig,
    pub(super) sessions: Arc<SessionRegistry>,
    pub(super) lifecycle: Arc<LifecycleStore>,
    pub(super) directory: Arc<ProviderDirectory>,
    pub(super) profiles: Arc<dyn ProfileStore>,
    pub(super) repository: Arc<dyn RequestRepository>,
    pub(super) notifier: Arc<dyn CompletionNotifier>,
    pub(super) resolver: LocationResolver,
    pub(super) active_searches: ActiveSearches,
    pub(super) stats: Arc<EngineStats>,
    pub(super) shutdown: CancellationToken,
}

impl DispatchEngine {
    /// Creates an engine and starts its terminated-entry sweeper.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        profiles: Arc<dyn ProfileStore>,
        repository: Arc<dyn RequestRepository>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let resolver = LocationResolver::new(config.location.clone());
        let lifecycle = Arc::new(LifecycleStore::new());
        let shutdown = CancellationToken::new();

        spawn_terminated_sweeper(
            Arc::clone(&lifecycle),
            config.terminated_grace,
            config.sweep_interval,
            shutdown.child_token(),
        );

        Self {
            directory: Arc::new(ProviderDirectory::new(
                Arc::clone(&profiles),
                resolver.clone(),
            )),
            sessions: Arc::new(SessionRegistry::new()),
            lifecycle,
            profiles,
            repository,
            notifier,
            resolver,
            active_searches: Arc::new(DashMap::new()),
            stats: Arc::new(EngineStats::default()),
            config,
            shutdown,
        }
    }

    /// The engine's session registry (the transport layer registers
    /// through [`register`](Self::register), but owns receiver pumps).
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The engine's lifecycle store.
    pub fn lifecycle(&self) -> &Arc<LifecycleStore> {
        &self.lifecycle
    }

    /// Counter snapshot for dashboards.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current load numbers (the health endpoint payload).
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            connected_users: self.sessions.count(IdentityKind::User),
            connected_providers: self.sessions.count(IdentityKind::Provider),
            active_requests: self.lifecycle.active_count(),
            live_searches: self.active_searches.len(),
        }
    }

    /// Registers a session for an identity, superseding any prior one.
    pub fn register(
        &self,
        kind: IdentityKind,
        identity_id: &str,
        sink: EventSink,
    ) -> Result<(), DispatchError> {
        if identity_id.trim().is_empty() {
            return Err(DispatchError::validation("identity id must not be empty"));
        }

        let ack = OutboundEvent::Registered {
            identity_id: identity_id.to_string(),
            identity_kind: kind.to_string(),
            message: format!("Successfully registered as {kind}"),
        };
        // Ack through the new sink directly: the registry entry may be
        // replaced again before the event would be routed.
        let _ = sink.send(ack);
        self.sessions.register(kind, identity_id, sink);
        Ok(())
    }

    /// Removes an identity's session. Idempotent.
    pub fn disconnect(&self, kind: IdentityKind, identity_id: &str) {
        self.sessions.remove(kind, identity_id);
    }

    /// Admits a new request and starts its progressive search.
    ///
    /// Rejects malformed input before any lifecycle entry exists. If the
    /// user already has an active request it is cancelled first: a new
    /// submission supersedes the old one.
    pub async fn submit_request(&self, submit: SubmitRequest) -> Result<String, DispatchError> {
        let category = self.validate_submit(&submit)?;

        if !self.sessions.is_connected(IdentityKind::User, &submit.user_id) {
            return Err(DispatchError::validation("user is not registered"));
        }

        if let Some(prior_id) = self.lifecycle.active_request_of(&submit.user_id) {
            match self.cancel_internal(&prior_id, "superseded") {
                Ok(_) => {
                    self.stats.requests_superseded.fetch_add(1, Ordering::Relaxed);
                    info!(
                        request_id = %prior_id,
                        user_id = %submit.user_id,
                        "prior request superseded by new submission"
                    );
                }
                Err(error) => {
                    debug!(request_id = %prior_id, %error, "prior request not cancellable");
                }
            }
        }

        let request = ServiceRequest::new(
            submit.request_id.clone(),
            submit.user_id.clone(),
            category,
            submit.description,
            submit.urgency,
            GeoPoint::new(submit.latitude, submit.longitude),
            self.config.search.start_radius_km,
        );

        self.lifecycle.create(request.clone()).map_err(|error| {
            let CreateError::Duplicate(id) = error;
            DispatchError::DuplicateRequest(id)
        })?;
        self.stats.requests_submitted.fetch_add(1, Ordering::Relaxed);
        mirror_save(Arc::clone(&self.repository), request.clone());

        info!(
            request_id = %request.request_id,
            user_id = %request.user_id,
            category = %request.category,
            "service request admitted"
        );

        // The search substate is visible to the requester from the first
        // confirmation onward.
        let searching = self.lifecycle.transition(
            &request.request_id,
            &[RequestStatus::Pending],
            RequestStatus::Searching,
            |_| {},
        );
        if let Ok(searching) = searching {
            self.sessions.send_to(
                IdentityKind::User,
                &searching.user_id,
                OutboundEvent::SearchStarted {
                    request_id: searching.request_id.clone(),
                    search_phase: searching.search_phase,
                    search_radius_km: searching.search_radius_km,
                    status: RequestStatus::Searching,
                    message: format!(
                        "Searching within {}km radius...",
                        searching.search_radius_km
                    ),
                },
            );
        }

        self.spawn_search(&request);
        Ok(request.request_id)
    }

    /// Cancels a request on behalf of its user.
    ///
    /// Valid only while the request is still searchable; an accepted or
    /// terminal request reports failure and nothing changes.
    pub fn cancel_request(
        &self,
        request_id: &str,
        initiating_user_id: &str,
    ) -> Result<(), DispatchError> {
        let request = self
            .lifecycle
            .get(request_id)
            .ok_or_else(|| DispatchError::NotFound {
                kind: "request",
                id: request_id.to_string(),
            })?;

        if request.user_id != initiating_user_id {
            return Err(DispatchError::Unauthorized {
                actor: initiating_user_id.to_string(),
                action: "cancel",
                request_id: request_id.to_string(),
            });
        }

        self.cancel_internal(request_id, "user_cancelled")?;
        self.stats.cancellations.fetch_add(1, Ordering::Relaxed);

        self.sessions.send_to(
            IdentityKind::User,
            initiating_user_id,
            OutboundEvent::RequestCancelled {
                request_id: request_id.to_string(),
                reason: "user_cancelled".to_string(),
                message: "Service request cancelled successfully".to_string(),
            },
        );
        Ok(())
    }

    /// Marks an assigned request completed by its provider.
    ///
    /// Any mismatch (wrong provider, or a status outside accepted /
    /// in-progress) fails with `Unauthorized` and mutates nothing.
    pub fn complete_service(
        &self,
        request_id: &str,
        provider_id: &str,
    ) -> Result<(), DispatchError> {
        let request = self
            .lifecycle
            .get(request_id)
            .ok_or_else(|| DispatchError::NotFound {
                kind: "request",
                id: request_id.to_string(),
            })?;

        if request.assigned_provider_id.as_deref() != Some(provider_id) {
            return Err(DispatchError::Unauthorized {
                actor: provider_id.to_string(),
                action: "complete",
                request_id: request_id.to_string(),
            });
        }

        let terminated = self.lifecycle.terminate(
            request_id,
            &[RequestStatus::Accepted, RequestStatus::InProgress],
            RequestStatus::Completed,
        );
        let (completed, _) = terminated.map_err(|error| match error {
            TransitionError::NotFound { request_id } => DispatchError::NotFound {
                kind: "request",
                id: request_id,
            },
            TransitionError::Stale { .. } => DispatchError::Unauthorized {
                actor: provider_id.to_string(),
                action: "complete",
                request_id: request_id.to_string(),
            },
        })?;

        self.stats.completions.fetch_add(1, Ordering::Relaxed);
        info!(request_id, provider_id, "service completed");

        let completed_at = completed.terminated_at.unwrap_or_else(chrono::Utc::now);
        self.sessions.send_to(
            IdentityKind::User,
            &completed.user_id,
            OutboundEvent::ServiceCompleted {
                request_id: request_id.to_string(),
                provider_id: provider_id.to_string(),
                completed_at,
            },
        );
        self.sessions.send_to(
            IdentityKind::Provider,
            provider_id,
            OutboundEvent::ServiceCompletionConfirmed {
                request_id: request_id.to_string(),
                message: "Service marked as completed successfully".to_string(),
            },
        );
        mirror_status(
            Arc::clone(&self.repository),
            completed,
            RequestStatus::Completed,
        );
        Ok(())
    }

    /// Stores a provider's live tracking fix and notifies nearby open
    /// requests.
    pub async fn update_provider_location(
        &self,
        provider_id: &str,
        latitude: f64,
        longitude: f64,
        accuracy_m: Option<f64>,
    ) -> Result<(), DispatchError> {
        if !validate_coordinates(latitude, longitude) {
            return Err(DispatchError::validation("invalid location coordinates"));
        }

        let previous = self
            .profiles
            .provider_snapshot(provider_id)
            .await
            .map_err(upstream)?
            .and_then(|snapshot| snapshot.live.map(|fix| (fix.latitude, fix.longitude)));

        let fix = LiveFix {
            latitude,
            longitude,
            accuracy_m,
            last_updated: chrono::Utc::now(),
        };
        self.profiles
            .update_live_fix(provider_id, fix)
            .await
            .map_err(|error| match error {
                StoreError::NotFound { .. } => DispatchError::NotFound {
                    kind: "provider",
                    id: provider_id.to_string(),
                },
                other => DispatchError::Upstream(other.to_string()),
            })?;

        self.sessions.send_to(
            IdentityKind::Provider,
            provider_id,
            OutboundEvent::LocationUpdateConfirmed {
                success: true,
                message: "Location updated successfully".to_string(),
            },
        );

        // Fan-out is worth doing only when the provider actually moved.
        if self
            .resolver
            .is_significant_movement(previous, (latitude, longitude))
        {
            self.notify_nearby_requests(provider_id, latitude, longitude)
                .await;
        }
        Ok(())
    }

    /// Stores a provider's online flag and tells affected requesters.
    pub async fn update_provider_online_status(
        &self,
        provider_id: &str,
        is_online: bool,
    ) -> Result<(), DispatchError> {
        self.profiles
            .update_online(provider_id, is_online)
            .await
            .map_err(|error| match error {
                StoreError::NotFound { .. } => DispatchError::NotFound {
                    kind: "provider",
                    id: provider_id.to_string(),
                },
                other => DispatchError::Upstream(other.to_string()),
            })?;

        info!(provider_id, is_online, "provider status updated");
        self.sessions.send_to(
            IdentityKind::Provider,
            provider_id,
            OutboundEvent::StatusUpdateConfirmed {
                success: true,
                is_online,
                message: format!(
                    "Provider is now {}",
                    if is_online { "online" } else { "offline" }
                ),
            },
        );

        self.notify_status_change(provider_id, is_online).await;
        Ok(())
    }

    /// Stops every live search and the sweeper. The engine is inert
    /// afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.active_searches.iter() {
            entry.value().cancel();
        }
        self.active_searches.clear();
        info!("dispatch engine shut down");
    }

    // ---- internals -------------------------------------------------------

    fn validate_submit(&self, submit: &SubmitRequest) -> Result<ServiceCategory, DispatchError> {
        if submit.request_id.trim().is_empty() {
            return Err(DispatchError::validation("requestId must not be empty"));
        }
        if submit.user_id.trim().is_empty() {
            return Err(DispatchError::validation("userId must not be empty"));
        }
        if submit.description.trim().is_empty() {
            return Err(DispatchError::validation("description must not be empty"));
        }
        if !validate_coordinates(submit.latitude, submit.longitude) {
            return Err(DispatchError::validation("invalid user location coordinates"));
        }
        submit.category.parse::<ServiceCategory>().map_err(|_| {
            DispatchError::validation(format!(
                "invalid service type. Allowed types: {}",
                ServiceCategory::ALL
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }

    /// Registers the search token and spawns the controller task.
    fn spawn_search(&self, request: &ServiceRequest) {
        let token = self.shutdown.child_token();
        self.active_searches
            .insert(request.request_id.clone(), token.clone());

        let controller = SearchController::new(
            request,
            self.config.search.clone(),
            SearchDeps {
                lifecycle: Arc::clone(&self.lifecycle),
                sessions: Arc::clone(&self.sessions),
                directory: Arc::clone(&self.directory),
                repository: Arc::clone(&self.repository),
                stats: Arc::clone(&self.stats),
                active_searches: Arc::clone(&self.active_searches),
            },
        );
        tokio::spawn(controller.run(token));
    }

    /// Stops the search, terminates the request as cancelled, and fans the
    /// cancellation out to every notified provider.
    pub(super) fn cancel_internal(
        &self,
        request_id: &str,
        reason: &str,
    ) -> Result<ServiceRequest, DispatchError> {
        if let Some((_, token)) = self.active_searches.remove(request_id) {
            token.cancel();
        }

        let terminated = self.lifecycle.terminate(
            request_id,
            &RequestStatus::SEARCHABLE,
            RequestStatus::Cancelled,
        );
        let (request, notified) = terminated.map_err(|error| match error {
            TransitionError::NotFound { request_id } => DispatchError::NotFound {
                kind: "request",
                id: request_id,
            },
            TransitionError::Stale { current, .. } => DispatchError::NotCancellable {
                request_id: request_id.to_string(),
                status: current,
            },
        })?;

        let mut notified_count = 0usize;
        for provider_id in &notified {
            let delivered = self.sessions.send_to(
                IdentityKind::Provider,
                provider_id,
                OutboundEvent::RequestCancelled {
                    request_id: request_id.to_string(),
                    reason: reason.to_string(),
                    message: "Service request was cancelled by the user".to_string(),
                },
            );
            if delivered {
                notified_count += 1;
            } else {
                warn!(request_id, provider_id = %provider_id, "cancellation notice skipped: session gone");
            }
        }

        info!(
            request_id,
            reason,
            notified = notified.len(),
            delivered = notified_count,
            "request cancelled"
        );
        mirror_status(
            Arc::clone(&self.repository),
            request.clone(),
            RequestStatus::Cancelled,
        );
        Ok(request)
    }

    /// Tells users with open matching requests that a provider moved into
    /// range.
    async fn notify_nearby_requests(&self, provider_id: &str, latitude: f64, longitude: f64) {
        let snapshot = match self.profiles.provider_snapshot(provider_id).await {
            Ok(Some(snapshot)) if snapshot.is_online => snapshot,
            Ok(_) => return,
            Err(error) => {
                warn!(provider_id, %error, "skipping nearby-user fan-out");
                return;
            }
        };

        let range_km = self.config.search.start_radius_km;
        for request in self.lifecycle.searchable_requests() {
            if !snapshot.service_categories.contains(&request.category) {
                continue;
            }
            let distance = request
                .origin
                .distance_km(&GeoPoint::new(latitude, longitude));
            if distance > range_km {
                continue;
            }
            self.sessions.send_to(
                IdentityKind::User,
                &request.user_id,
                OutboundEvent::NewProviderInRange {
                    request_id: request.request_id.clone(),
                    provider: snapshot.public_info(),
                    distance_km: distance,
                },
            );
        }
    }

    /// Tells users with open matching requests that a provider toggled
    /// online/offline. Offline changes always go out; online ones only
    /// within the search ceiling.
    async fn notify_status_change(&self, provider_id: &str, is_online: bool) {
        let snapshot = match self.profiles.provider_snapshot(provider_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(error) => {
                warn!(provider_id, %error, "skipping status-change fan-out");
                return;
            }
        };

        let resolved = self.resolver.resolve(&snapshot);
        for request in self.lifecycle.searchable_requests() {
            if !snapshot.service_categories.contains(&request.category) {
                continue;
            }
            let distance = resolved.as_ref().map(|location| {
                request
                    .origin
                    .distance_km(&GeoPoint::new(location.latitude, location.longitude))
            });

            if is_online {
                let in_range = distance
                    .map(|d| d <= self.config.search.max_radius_km)
                    .unwrap_or(false);
                if !in_range {
                    continue;
                }
            }

            self.sessions.send_to(
                IdentityKind::User,
                &request.user_id,
                OutboundEvent::ProviderStatusChanged {
                    request_id: request.request_id.clone(),
                    provider_id: provider_id.to_string(),
                    is_online,
                    distance_km: distance,
                },
            );
        }
    }
}

fn upstream(error: StoreError) -> DispatchError {
    DispatchError::Upstream(error.to_string())
}
