//! Per-request progressive search task.
//!
//! One controller runs per in-flight request: an immediate first pass, then
//! one pass per phase duration, until candidates are broadcast, the search
//! times out, or the request is cancelled. The controller owns exactly one
//! timer; every exit path removes its cancellation token from the live
//! table so no zombie broadcast can fire after termination.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SearchConfig;
use crate::engine::EngineStats;
use crate::events::{BroadcastPriority, OutboundEvent};
use crate::geo::{format_distance, GeoPoint};
use crate::lifecycle::{LifecycleStore, RequestStatus, ServiceRequest, Urgency};
use crate::persistence::{mirror_status, RequestRepository};
use crate::provider::{Candidate, ProviderDirectory, ServiceCategory};
use crate::session::{IdentityKind, SessionRegistry};

/// Cancellation tokens of the searches currently running, keyed by request
/// id. Shared between the engine (which stops searches) and each controller
/// (which removes itself on exit).
pub type ActiveSearches = Arc<DashMap<String, CancellationToken>>;

/// Shared collaborators a search controller needs.
#[derive(Clone)]
pub struct SearchDeps {
    pub lifecycle: Arc<LifecycleStore>,
    pub sessions: Arc<SessionRegistry>,
    pub directory: Arc<ProviderDirectory>,
    pub repository: Arc<dyn RequestRepository>,
    pub stats: Arc<EngineStats>,
    pub active_searches: ActiveSearches,
}

/// What a single search pass decided.
enum TickOutcome {
    /// Keep ticking.
    Continue,
    /// The search is over; stop the timer.
    Stopped,
}

/// Drives the phased radius expansion for one request.
pub struct SearchController {
    request_id: String,
    user_id: String,
    category: ServiceCategory,
    description: String,
    urgency: Urgency,
    origin: GeoPoint,
    config: SearchConfig,
    deps: SearchDeps,
}

impl SearchController {
    /// Creates a controller for a freshly admitted request.
    pub fn new(request: &ServiceRequest, config: SearchConfig, deps: SearchDeps) -> Self {
        Self {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            category: request.category,
            description: request.description.clone(),
            urgency: request.urgency,
            origin: request.origin,
            config,
            deps,
        }
    }

    /// Runs the search until resolution or cancellation.
    ///
    /// The first pass runs immediately; later passes run once per phase
    /// duration. Cancellation is observed between passes and wins ties.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            request_id = %self.request_id,
            category = %self.category,
            radius_km = self.config.start_radius_km,
            "progressive search started"
        );

        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(self.config.phase_duration);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(request_id = %self.request_id, "search cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    match self.tick(started.elapsed()).await {
                        TickOutcome::Continue => {}
                        TickOutcome::Stopped => break,
                    }
                }
            }
        }

        self.deps.active_searches.remove(&self.request_id);
    }

    /// One search pass: deadline check, phase expansion, candidate query,
    /// broadcast or early timeout.
    async fn tick(&self, elapsed: Duration) -> TickOutcome {
        let elapsed_seconds = elapsed.as_secs();

        if elapsed >= self.config.max_search_time {
            return self.resolve_timeout(elapsed_seconds);
        }

        let Some(current) = self.deps.lifecycle.get(&self.request_id) else {
            debug!(request_id = %self.request_id, "request gone, stopping search");
            return TickOutcome::Stopped;
        };
        if !current.status.is_searchable() {
            return TickOutcome::Stopped;
        }

        // Expansion comes before the query: the requester hears about the
        // wider radius even when it also turns up empty.
        let target_phase = self.config.phase_for_elapsed(elapsed);
        let target_radius = self.config.radius_for_phase(target_phase);
        let (phase, radius) = if target_radius > current.search_radius_km {
            match self.expand_to(target_phase, target_radius, elapsed_seconds) {
                Some(expanded) => expanded,
                None => return TickOutcome::Stopped,
            }
        } else {
            (current.search_phase, current.search_radius_km)
        };

        debug!(
            request_id = %self.request_id,
            phase,
            radius_km = radius,
            elapsed_seconds,
            "searching for candidates"
        );

        // The full eligible set is queried every pass: expansion deliberately
        // re-broadcasts to providers notified at a smaller radius.
        let candidates = self
            .deps
            .directory
            .find_candidates(
                self.origin,
                self.category,
                radius,
                self.deps.sessions.provider_ids(),
                &HashSet::new(),
            )
            .await;

        if !candidates.is_empty() {
            return self.broadcast(candidates, phase, radius, elapsed_seconds);
        }

        if radius >= self.config.max_radius_km {
            // Nothing within the ceiling; no point waiting out the clock.
            return self.resolve_timeout(elapsed_seconds);
        }

        TickOutcome::Continue
    }

    /// Advances phase and radius, notifying the requester.
    fn expand_to(&self, phase: u32, radius_km: f64, elapsed_seconds: u64) -> Option<(u32, f64)> {
        let expanded = self.deps.lifecycle.transition(
            &self.request_id,
            &[RequestStatus::Pending, RequestStatus::Searching],
            RequestStatus::Searching,
            |request| {
                request.search_phase = phase;
                request.search_radius_km = radius_km;
            },
        );

        match expanded {
            Ok(request) => {
                info!(
                    request_id = %self.request_id,
                    phase,
                    radius_km,
                    elapsed_seconds,
                    "search radius expanded"
                );
                self.deps.sessions.send_to(
                    IdentityKind::User,
                    &self.user_id,
                    OutboundEvent::SearchPhaseExpanded {
                        request_id: self.request_id.clone(),
                        search_phase: phase,
                        search_radius_km: radius_km,
                        elapsed_seconds,
                        message: format!("Expanding search to {radius_km}km radius"),
                    },
                );
                mirror_status(
                    Arc::clone(&self.deps.repository),
                    request,
                    RequestStatus::Searching,
                );
                Some((phase, radius_km))
            }
            Err(error) => {
                // Lost to an accept or cancellation between passes.
                debug!(request_id = %self.request_id, %error, "expansion skipped");
                None
            }
        }
    }

    /// Notifies the capped candidate set and stops the search.
    fn broadcast(
        &self,
        candidates: Vec<Candidate>,
        phase: u32,
        radius_km: f64,
        elapsed_seconds: u64,
    ) -> TickOutcome {
        let total_eligible = candidates.len();
        let capped: Vec<Candidate> = candidates
            .into_iter()
            .take(self.config.max_providers_per_broadcast)
            .collect();
        let priority = BroadcastPriority::for_phase(phase);

        let mut delivered = 0usize;
        for candidate in &capped {
            let event = OutboundEvent::IncomingServiceRequest {
                request_id: self.request_id.clone(),
                user_id: self.user_id.clone(),
                category: self.category,
                description: self.description.clone(),
                urgency: self.urgency,
                origin: self.origin,
                distance_km: candidate.distance_km,
                distance_label: format_distance(Some(candidate.distance_km)),
                search_phase: phase,
                priority,
                elapsed_seconds,
            };

            if self
                .deps
                .sessions
                .send_to(IdentityKind::Provider, &candidate.snapshot.id, event)
            {
                delivered += 1;
                self.deps
                    .stats
                    .broadcasts_delivered
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                // Skipped, not retried: a later phase would include them
                // again if the search were still running.
                self.deps
                    .stats
                    .broadcasts_skipped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %self.request_id,
                    provider_id = %candidate.snapshot.id,
                    "broadcast skipped: provider session gone"
                );
            }
        }

        self.deps.lifecycle.note_notified(
            &self.request_id,
            capped.iter().map(|c| c.snapshot.id.clone()),
        );

        let found = self.deps.lifecycle.transition(
            &self.request_id,
            &[RequestStatus::Pending, RequestStatus::Searching],
            RequestStatus::ProvidersFound,
            |_| {},
        );
        let request = match found {
            Ok(request) => request,
            Err(error) => {
                // A provider accepted while we were broadcasting; the user
                // already has the assignment event.
                debug!(request_id = %self.request_id, %error, "skipping candidates summary");
                return TickOutcome::Stopped;
            }
        };

        let nearest = capped
            .iter()
            .map(|c| c.distance_km)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        info!(
            request_id = %self.request_id,
            phase,
            radius_km,
            eligible = total_eligible,
            notified = capped.len(),
            delivered,
            "candidates found, search stopped"
        );

        self.deps.sessions.send_to(
            IdentityKind::User,
            &self.user_id,
            OutboundEvent::CandidatesFound {
                request_id: self.request_id.clone(),
                provider_count: capped.len(),
                search_phase: phase,
                search_radius_km: radius_km,
                nearest_distance_km: nearest,
                elapsed_seconds,
                message: format!(
                    "Found {} providers within {radius_km}km!",
                    capped.len()
                ),
            },
        );
        mirror_status(
            Arc::clone(&self.deps.repository),
            request,
            RequestStatus::ProvidersFound,
        );

        TickOutcome::Stopped
    }

    /// Resolves the search as timed out, when still permitted.
    fn resolve_timeout(&self, elapsed_seconds: u64) -> TickOutcome {
        let terminated = self.deps.lifecycle.terminate(
            &self.request_id,
            &RequestStatus::SEARCHABLE,
            RequestStatus::TimedOut,
        );

        match terminated {
            Ok((request, _notified)) => {
                self.deps.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                info!(
                    request_id = %self.request_id,
                    elapsed_seconds,
                    "search timed out, no providers found"
                );
                self.deps.sessions.send_to(
                    IdentityKind::User,
                    &self.user_id,
                    OutboundEvent::SearchTimedOut {
                        request_id: self.request_id.clone(),
                        search_phase: request.search_phase,
                        search_radius_km: request.search_radius_km,
                        elapsed_seconds,
                        message: format!(
                            "No {} providers found within {}km",
                            self.category, self.config.max_radius_km
                        ),
                    },
                );
                mirror_status(
                    Arc::clone(&self.deps.repository),
                    request,
                    RequestStatus::TimedOut,
                );
            }
            Err(error) => {
                debug!(request_id = %self.request_id, %error, "timeout skipped");
            }
        }

        TickOutcome::Stopped
    }
}
