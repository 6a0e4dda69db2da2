//! In-memory authoritative state for in-flight requests.
//!
//! All status mutations funnel through [`LifecycleStore::transition`], a
//! conditional update performed under the map entry's lock. That single
//! compare-and-set point is what makes concurrent provider accepts resolve
//! to exactly one winner. Entries for distinct request ids never share a
//! lock, so unrelated requests proceed in parallel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::request::{RequestStatus, ServiceRequest};

/// Failure to admit a new request.
#[derive(Debug, Error)]
pub enum CreateError {
    /// A request with this id already exists.
    #[error("request {0} already exists")]
    Duplicate(String),
}

/// Failure of a conditional status update.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// No entry for the request id.
    #[error("request {request_id} not found")]
    NotFound { request_id: String },

    /// The precondition did not hold; nothing was mutated.
    #[error(
        "stale transition on request {request_id}: status is {current}, requested {requested}"
    )]
    Stale {
        request_id: String,
        current: RequestStatus,
        requested: RequestStatus,
    },
}

/// Owned table of in-flight service requests.
///
/// Holds the canonical `ServiceRequest` per id, the per-user pointer to
/// their single active request, and the per-request set of notified
/// providers. Terminated entries stay queryable until swept.
#[derive(Debug, Default)]
pub struct LifecycleStore {
    requests: DashMap<String, ServiceRequest>,
    active_by_user: DashMap<String, String>,
    notified: DashMap<String, HashSet<String>>,
}

impl LifecycleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new request and records it as the user's active request.
    ///
    /// The caller is responsible for cancelling any prior active request of
    /// the same user first (submitting anew supersedes the old request).
    pub fn create(&self, request: ServiceRequest) -> Result<(), CreateError> {
        let request_id = request.request_id.clone();
        let user_id = request.user_id.clone();

        match self.requests.entry(request_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CreateError::Duplicate(request_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(request);
            }
        }

        self.active_by_user.insert(user_id, request_id);
        Ok(())
    }

    /// Conditionally moves a request to a new status.
    ///
    /// Succeeds only while the current status is in `expected`; `mutate`
    /// then runs on the entry under the same lock, so the check and the
    /// write are one atomic step. On failure nothing is mutated and the
    /// caller learns the current status from the error.
    pub fn transition(
        &self,
        request_id: &str,
        expected: &[RequestStatus],
        new_status: RequestStatus,
        mutate: impl FnOnce(&mut ServiceRequest),
    ) -> Result<ServiceRequest, TransitionError> {
        let mut entry =
            self.requests
                .get_mut(request_id)
                .ok_or_else(|| TransitionError::NotFound {
                    request_id: request_id.to_string(),
                })?;

        if !expected.contains(&entry.status) {
            return Err(TransitionError::Stale {
                request_id: request_id.to_string(),
                current: entry.status,
                requested: new_status,
            });
        }

        entry.status = new_status;
        mutate(&mut entry);
        trace!(request_id, status = %new_status, "request transitioned");
        Ok(entry.clone())
    }

    /// Conditionally moves a request to a terminal status and evicts its
    /// live search state (notified set, active-request pointer).
    ///
    /// Like [`transition`](Self::transition), succeeds only while the
    /// current status is in `expected`, so a timeout can never clobber an
    /// accepted request. Returns the terminated snapshot together with the
    /// evicted notified set, read atomically with the eviction so
    /// cancellation fan-out reaches exactly the providers that were
    /// notified. The entry itself stays queryable until
    /// [`sweep_terminated`](Self::sweep_terminated) drops it after the
    /// grace period.
    pub fn terminate(
        &self,
        request_id: &str,
        expected: &[RequestStatus],
        final_status: RequestStatus,
    ) -> Result<(ServiceRequest, HashSet<String>), TransitionError> {
        debug_assert!(final_status.is_terminal());

        let snapshot = {
            let mut entry =
                self.requests
                    .get_mut(request_id)
                    .ok_or_else(|| TransitionError::NotFound {
                        request_id: request_id.to_string(),
                    })?;

            if !expected.contains(&entry.status) {
                return Err(TransitionError::Stale {
                    request_id: request_id.to_string(),
                    current: entry.status,
                    requested: final_status,
                });
            }

            entry.status = final_status;
            entry.terminated_at = Some(Utc::now());
            entry.clone()
        };

        let notified = self
            .notified
            .remove(request_id)
            .map(|(_, set)| set)
            .unwrap_or_default();
        self.active_by_user
            .remove_if(&snapshot.user_id, |_, active| active == request_id);

        debug!(request_id, status = %final_status, "request terminated");
        Ok((snapshot, notified))
    }

    /// Returns a copy of the request, terminal entries included.
    pub fn get(&self, request_id: &str) -> Option<ServiceRequest> {
        self.requests.get(request_id).map(|entry| entry.clone())
    }

    /// The id of the user's currently active request, if any.
    pub fn active_request_of(&self, user_id: &str) -> Option<String> {
        self.active_by_user.get(user_id).map(|entry| entry.clone())
    }

    /// Records providers as notified for a request. Append-only while the
    /// request is searching.
    pub fn note_notified(&self, request_id: &str, provider_ids: impl IntoIterator<Item = String>) {
        self.notified
            .entry(request_id.to_string())
            .or_default()
            .extend(provider_ids);
    }

    /// The set of providers notified so far for a request.
    pub fn notified_providers(&self, request_id: &str) -> HashSet<String> {
        self.notified
            .get(request_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Drops the notified set for a request.
    pub fn clear_notified(&self, request_id: &str) {
        self.notified.remove(request_id);
    }

    /// Copies of all requests still open to matching (pending, searching,
    /// or providers found). Used for provider-movement and status-change
    /// fan-out.
    pub fn searchable_requests(&self) -> Vec<ServiceRequest> {
        self.requests
            .iter()
            .filter(|entry| entry.status.is_searchable())
            .map(|entry| entry.clone())
            .collect()
    }

    /// Number of non-terminal requests.
    pub fn active_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }

    /// Total entries held, terminal included.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drops terminal entries older than `grace`. Returns how many were
    /// evicted.
    pub fn sweep_terminated(&self, grace: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let before = self.requests.len();
        self.requests.retain(|_, request| {
            match (request.status.is_terminal(), request.terminated_at) {
                (true, Some(at)) => at > cutoff,
                _ => true,
            }
        });
        // Notified sets can only outlive their request across a narrow
        // tick/terminate overlap; prune the orphans here.
        self.notified
            .retain(|request_id, _| self.requests.contains_key(request_id));
        before - self.requests.len()
    }
}

/// Spawns the janitor that periodically sweeps terminated entries.
///
/// Runs until the token is cancelled. One sweeper per engine.
pub fn spawn_terminated_sweeper(
    store: Arc<LifecycleStore>,
    grace: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let swept = store.sweep_terminated(grace);
                    if swept > 0 {
                        debug!(swept, "swept terminated requests");
                    }
                }
            }
        }
    })
}
