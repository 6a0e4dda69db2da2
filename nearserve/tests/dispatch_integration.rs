//! Integration tests for the dispatch engine.
//!
//! These tests verify the complete dispatch workflow including:
//! - Phase-1 matching and the accept flow
//! - At-most-one assignment under concurrent accepts
//! - Radius expansion, stop-on-first-match and timeout determinism
//! - Cancellation fan-out to notified providers
//! - Completion authorization
//!
//! Timer-sensitive tests run on Tokio's paused clock so phase expansion
//! and deadlines are deterministic.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use nearserve::config::EngineConfig;
use nearserve::engine::{DispatchEngine, ResponseDecision, ResponseOutcome, SubmitRequest};
use nearserve::events::OutboundEvent;
use nearserve::lifecycle::{RequestStatus, Urgency};
use nearserve::location::{LiveFix, StaticLocation};
use nearserve::persistence::{NoOpNotifier, NoOpRepository};
use nearserve::provider::{MemoryProfileStore, ProviderSnapshot, ServiceCategory};
use nearserve::session::IdentityKind;

// =============================================================================
// Test Helpers
// =============================================================================

const USER_LAT: f64 = 19.0760;
const USER_LNG: f64 = 72.8777;

struct Harness {
    engine: Arc<DispatchEngine>,
    store: Arc<MemoryProfileStore>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryProfileStore::new());
        let engine = Arc::new(DispatchEngine::new(
            EngineConfig::default(),
            store.clone(),
            Arc::new(NoOpRepository),
            Arc::new(NoOpNotifier),
        ));
        Self { engine, store }
    }

    /// Registers a user session and returns its event receiver (with the
    /// registration ack already consumed).
    fn connect_user(&self, user_id: &str) -> mpsc::UnboundedReceiver<OutboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.engine
            .register(IdentityKind::User, user_id, tx)
            .expect("user registration failed");
        let ack = rx.try_recv().expect("missing registration ack");
        assert!(matches!(ack, OutboundEvent::Registered { .. }));
        rx
    }

    /// Seeds a provider record and registers its session.
    fn connect_provider(
        &self,
        provider_id: &str,
        lat: f64,
        lng: f64,
        category: ServiceCategory,
    ) -> mpsc::UnboundedReceiver<OutboundEvent> {
        self.store.insert_provider(online_provider(provider_id, lat, lng, category));
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.engine
            .register(IdentityKind::Provider, provider_id, tx)
            .expect("provider registration failed");
        let _ack = rx.try_recv().expect("missing registration ack");
        rx
    }

    fn submit(&self, request_id: &str, user_id: &str, category: &str) -> SubmitRequest {
        SubmitRequest {
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            category: category.to_string(),
            description: "tap is leaking".to_string(),
            urgency: Urgency::Medium,
            latitude: USER_LAT,
            longitude: USER_LNG,
        }
    }
}

fn online_provider(id: &str, lat: f64, lng: f64, category: ServiceCategory) -> ProviderSnapshot {
    ProviderSnapshot {
        id: id.to_string(),
        name: format!("Provider {id}"),
        phone: "555-0100".to_string(),
        rating: 4.6,
        experience: "4 years".to_string(),
        service_categories: [category].into_iter().collect(),
        is_available: true,
        is_online: true,
        live: Some(LiveFix {
            latitude: lat,
            longitude: lng,
            accuracy_m: Some(15.0),
            last_updated: chrono::Utc::now(),
        }),
        static_location: Some(StaticLocation {
            latitude: lat,
            longitude: lng,
            last_updated: Some(chrono::Utc::now()),
        }),
    }
}

/// Waits for the next event, letting the paused clock advance through
/// search ticks if needed.
async fn next_event(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> OutboundEvent {
    timeout(Duration::from_secs(150), rx.recv())
        .await
        .expect("no event before deadline")
        .expect("event channel closed")
}

/// Drains events already queued on the channel without waiting.
fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Waits until the user channel yields the given event kind, returning the
/// skipped events too.
async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    name: &str,
) -> (OutboundEvent, Vec<OutboundEvent>) {
    let mut skipped = Vec::new();
    loop {
        let event = next_event(rx).await;
        if event.name() == name {
            return (event, skipped);
        }
        skipped.push(event);
    }
}

// =============================================================================
// Scenario: phase-1 match and accept
// =============================================================================

#[tokio::test(start_paused = true)]
async fn phase_one_match_and_accept() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let mut provider_rx =
        harness.connect_provider("p-1", 19.0765, 72.8782, ServiceCategory::Plumber);

    harness
        .engine
        .submit_request(harness.submit("req-1", "user-1", "plumber"))
        .await
        .expect("submission failed");

    // Requester sees the search start, then the phase-1 match.
    let (started, _) = wait_for(&mut user_rx, "searchStarted").await;
    let OutboundEvent::SearchStarted {
        search_phase,
        search_radius_km,
        ..
    } = started
    else {
        panic!("wrong event");
    };
    assert_eq!(search_phase, 1);
    assert_eq!(search_radius_km, 1.0);

    let (found, skipped) = wait_for(&mut user_rx, "candidatesFound").await;
    assert!(
        skipped.iter().all(|e| e.name() != "searchPhaseExpanded"),
        "phase-1 match must not expand the radius"
    );
    let OutboundEvent::CandidatesFound {
        provider_count,
        search_phase,
        nearest_distance_km,
        ..
    } = found
    else {
        panic!("wrong event");
    };
    assert_eq!(provider_count, 1);
    assert_eq!(search_phase, 1);
    assert!(nearest_distance_km.expect("nearest distance missing") < 1.0);

    // The provider got exactly one card.
    let card = next_event(&mut provider_rx).await;
    let OutboundEvent::IncomingServiceRequest {
        request_id,
        distance_km,
        priority,
        ..
    } = card
    else {
        panic!("expected request card, got {card:?}");
    };
    assert_eq!(request_id, "req-1");
    assert!(distance_km < 1.0);
    assert_eq!(priority, nearserve::events::BroadcastPriority::High);

    // Accept wins and the requester hears about the assignment.
    let outcome = harness
        .engine
        .provider_responds("req-1", "p-1", ResponseDecision::Accept, None)
        .await
        .expect("response failed");
    assert_eq!(outcome, ResponseOutcome::Accepted);

    let (assigned, _) = wait_for(&mut user_rx, "providerAssigned").await;
    let OutboundEvent::ProviderAssigned { provider, .. } = assigned else {
        panic!("wrong event");
    };
    assert_eq!(provider.id, "p-1");

    let request = harness.engine.lifecycle().get("req-1").expect("request gone");
    assert_eq!(request.status, RequestStatus::Accepted);
    assert_eq!(request.assigned_provider_id.as_deref(), Some("p-1"));
}

// =============================================================================
// At-most-one assignment
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_accepts_produce_one_winner() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");

    let provider_ids: Vec<String> = (0..5).map(|i| format!("p-{i}")).collect();
    let mut provider_rxs = Vec::new();
    for (i, id) in provider_ids.iter().enumerate() {
        let jitter = 0.0004 * i as f64;
        provider_rxs.push(harness.connect_provider(
            id,
            19.0765 + jitter,
            72.8782 + jitter,
            ServiceCategory::Electrician,
        ));
    }

    harness
        .engine
        .submit_request(harness.submit("req-race", "user-1", "electrician"))
        .await
        .expect("submission failed");

    // Every provider receives the broadcast before anyone answers.
    for rx in &mut provider_rxs {
        let card = next_event(rx).await;
        assert_eq!(card.name(), "incomingServiceRequest");
    }

    let mut accepts = Vec::new();
    for id in &provider_ids {
        let engine = harness.engine.clone();
        let id = id.clone();
        accepts.push(tokio::spawn(async move {
            engine
                .provider_responds("req-race", &id, ResponseDecision::Accept, None)
                .await
                .expect("response failed")
        }));
    }

    let mut outcomes = Vec::new();
    for task in accepts {
        outcomes.push(task.await.expect("accept task panicked"));
    }

    let winners = outcomes
        .iter()
        .filter(|o| **o == ResponseOutcome::Accepted)
        .count();
    let losers = outcomes
        .iter()
        .filter(|o| **o == ResponseOutcome::LostRace)
        .count();
    assert_eq!(winners, 1, "exactly one accept must win");
    assert_eq!(losers, provider_ids.len() - 1);

    // Exactly one assignment event reaches the requester.
    let (_, _) = wait_for(&mut user_rx, "providerAssigned").await;
    let extra = drain(&mut user_rx);
    assert!(
        extra.iter().all(|e| e.name() != "providerAssigned"),
        "only one providerAssigned may be emitted"
    );

    // Each losing provider got its own alreadyAssigned ack; the winner none.
    let request = harness.engine.lifecycle().get("req-race").expect("gone");
    let winner_id = request.assigned_provider_id.clone().expect("no winner");
    for (id, rx) in provider_ids.iter().zip(provider_rxs.iter_mut()) {
        let acks = drain(rx)
            .into_iter()
            .filter(|e| e.name() == "alreadyAssigned")
            .count();
        if *id == winner_id {
            assert_eq!(acks, 0, "winner must not receive alreadyAssigned");
        } else {
            assert_eq!(acks, 1, "loser {id} must receive exactly one ack");
        }
    }

    // The assignment is immutable: a later accept still loses.
    let late = harness
        .engine
        .provider_responds("req-race", &provider_ids[0], ResponseDecision::Accept, None)
        .await
        .expect("late response failed");
    if provider_ids[0] != winner_id {
        assert_eq!(late, ResponseOutcome::LostRace);
    }
    let after = harness.engine.lifecycle().get("req-race").expect("gone");
    assert_eq!(after.assigned_provider_id, Some(winner_id));
}

// =============================================================================
// Radius expansion and stop-on-first-match
// =============================================================================

#[tokio::test(start_paused = true)]
async fn search_expands_until_first_match_then_stops() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    // Roughly 2.5 km from the origin: phases 1-2 miss, phase 3 matches.
    let mut provider_rx =
        harness.connect_provider("p-far", 19.0985, 72.8777, ServiceCategory::Carpenter);

    harness
        .engine
        .submit_request(harness.submit("req-exp", "user-1", "carpenter"))
        .await
        .expect("submission failed");

    let (found, skipped) = wait_for(&mut user_rx, "candidatesFound").await;

    // Radius announcements are monotonically increasing and capped.
    let mut last_radius = 1.0;
    for event in &skipped {
        if let OutboundEvent::SearchPhaseExpanded {
            search_radius_km, ..
        } = event
        {
            assert!(*search_radius_km > last_radius, "radius must grow");
            assert!(*search_radius_km <= 4.0, "radius must stay capped");
            last_radius = *search_radius_km;
        }
    }
    assert_eq!(last_radius, 3.0, "match expected at the 3km phase");

    let OutboundEvent::CandidatesFound {
        search_phase,
        search_radius_km,
        provider_count,
        ..
    } = found
    else {
        panic!("wrong event");
    };
    assert_eq!(search_phase, 3);
    assert_eq!(search_radius_km, 3.0);
    assert_eq!(provider_count, 1);

    let card = next_event(&mut provider_rx).await;
    assert_eq!(card.name(), "incomingServiceRequest");

    // Stop-on-first-match: no further expansion or re-broadcast happens
    // even as more phase durations pass.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(drain(&mut user_rx)
        .iter()
        .all(|e| e.name() != "searchPhaseExpanded"));
    assert!(drain(&mut provider_rx).is_empty());

    let request = harness.engine.lifecycle().get("req-exp").expect("gone");
    assert_eq!(request.status, RequestStatus::ProvidersFound);
    assert_eq!(request.search_radius_km, 3.0);
}

// =============================================================================
// Timeout determinism
// =============================================================================

#[tokio::test(start_paused = true)]
async fn empty_region_times_out_within_deadline() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");

    harness
        .engine
        .submit_request(harness.submit("req-empty", "user-1", "painter"))
        .await
        .expect("submission failed");

    let (timed_out, skipped) = wait_for(&mut user_rx, "searchTimedOut").await;
    let OutboundEvent::SearchTimedOut {
        elapsed_seconds,
        search_radius_km,
        ..
    } = timed_out
    else {
        panic!("wrong event");
    };

    // The search reached the ceiling, found nothing, and resolved at or
    // before the global deadline.
    assert_eq!(search_radius_km, 4.0);
    assert!(elapsed_seconds <= 120, "timed out after the deadline");

    let expansions = skipped
        .iter()
        .filter(|e| e.name() == "searchPhaseExpanded")
        .count();
    assert_eq!(expansions, 3, "phases 2, 3 and 4 announced");

    let request = harness.engine.lifecycle().get("req-empty").expect("gone");
    assert_eq!(request.status, RequestStatus::TimedOut);

    // The search task tears its token down on exit.
    tokio::task::yield_now().await;
    assert_eq!(harness.engine.health_snapshot().live_searches, 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn cancellation_fans_out_to_each_notified_provider_once() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let mut near_a = harness.connect_provider("p-a", 19.0765, 72.8782, ServiceCategory::Cleaning);
    let mut near_b = harness.connect_provider("p-b", 19.0770, 72.8785, ServiceCategory::Cleaning);
    // Far beyond the ceiling: never notified.
    let mut far = harness.connect_provider("p-far", 19.6000, 73.4000, ServiceCategory::Cleaning);

    harness
        .engine
        .submit_request(harness.submit("req-cancel", "user-1", "cleaning"))
        .await
        .expect("submission failed");

    wait_for(&mut user_rx, "candidatesFound").await;
    assert_eq!(next_event(&mut near_a).await.name(), "incomingServiceRequest");
    assert_eq!(next_event(&mut near_b).await.name(), "incomingServiceRequest");

    harness
        .engine
        .cancel_request("req-cancel", "user-1")
        .expect("cancellation failed");

    for rx in [&mut near_a, &mut near_b] {
        let cancellations = drain(rx)
            .into_iter()
            .filter(|e| e.name() == "requestCancelled")
            .count();
        assert_eq!(cancellations, 1, "each notified provider hears exactly once");
    }
    assert!(
        drain(&mut far).is_empty(),
        "never-notified providers hear nothing"
    );

    let (ack, _) = wait_for(&mut user_rx, "requestCancelled").await;
    assert_eq!(ack.name(), "requestCancelled");

    let request = harness.engine.lifecycle().get("req-cancel").expect("gone");
    assert_eq!(request.status, RequestStatus::Cancelled);

    // Cancelling again reports failure.
    assert!(harness.engine.cancel_request("req-cancel", "user-1").is_err());
}

#[tokio::test(start_paused = true)]
async fn cancellation_cannot_unassign_an_accepted_request() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let _provider_rx =
        harness.connect_provider("p-1", 19.0765, 72.8782, ServiceCategory::Plumber);

    harness
        .engine
        .submit_request(harness.submit("req-1", "user-1", "plumber"))
        .await
        .expect("submission failed");
    wait_for(&mut user_rx, "candidatesFound").await;

    harness
        .engine
        .provider_responds("req-1", "p-1", ResponseDecision::Accept, None)
        .await
        .expect("accept failed");

    let error = harness
        .engine
        .cancel_request("req-1", "user-1")
        .expect_err("cancel after accept must fail");
    assert!(error.to_string().contains("no longer be cancelled"));

    let request = harness.engine.lifecycle().get("req-1").expect("gone");
    assert_eq!(request.status, RequestStatus::Accepted);
}

#[tokio::test(start_paused = true)]
async fn new_submission_supersedes_users_active_request() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let mut provider_rx =
        harness.connect_provider("p-1", 19.0765, 72.8782, ServiceCategory::Plumber);

    harness
        .engine
        .submit_request(harness.submit("req-old", "user-1", "plumber"))
        .await
        .expect("first submission failed");
    wait_for(&mut user_rx, "candidatesFound").await;
    assert_eq!(next_event(&mut provider_rx).await.name(), "incomingServiceRequest");

    harness
        .engine
        .submit_request(harness.submit("req-new", "user-1", "plumber"))
        .await
        .expect("second submission failed");

    let old = harness.engine.lifecycle().get("req-old").expect("gone");
    assert_eq!(old.status, RequestStatus::Cancelled);
    assert_eq!(
        harness.engine.lifecycle().active_request_of("user-1"),
        Some("req-new".to_string())
    );

    // The notified provider's card for the old request is retracted.
    let retractions = drain(&mut provider_rx)
        .into_iter()
        .filter(|e| matches!(e, OutboundEvent::RequestCancelled { request_id, .. } if request_id == "req-old"))
        .count();
    assert_eq!(retractions, 1);
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn completion_requires_the_assigned_provider() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let mut provider_rx =
        harness.connect_provider("p-1", 19.0765, 72.8782, ServiceCategory::AcRepair);
    harness.connect_provider("p-intruder", 19.0770, 72.8790, ServiceCategory::AcRepair);

    harness
        .engine
        .submit_request(harness.submit("req-1", "user-1", "ac_repair"))
        .await
        .expect("submission failed");
    wait_for(&mut user_rx, "candidatesFound").await;

    harness
        .engine
        .provider_responds("req-1", "p-1", ResponseDecision::Accept, None)
        .await
        .expect("accept failed");

    // Completing before acceptance, or by another provider, is refused.
    let error = harness
        .engine
        .complete_service("req-1", "p-intruder")
        .expect_err("foreign completion must fail");
    assert!(error.to_string().contains("not authorized"));

    harness
        .engine
        .complete_service("req-1", "p-1")
        .expect("completion failed");

    let (done, _) = wait_for(&mut user_rx, "serviceCompleted").await;
    let OutboundEvent::ServiceCompleted { provider_id, .. } = done else {
        panic!("wrong event");
    };
    assert_eq!(provider_id, "p-1");

    let confirmations = drain(&mut provider_rx)
        .into_iter()
        .filter(|e| e.name() == "serviceCompletionConfirmed")
        .count();
    assert_eq!(confirmations, 1);

    let request = harness.engine.lifecycle().get("req-1").expect("gone");
    assert_eq!(request.status, RequestStatus::Completed);

    // Completing twice is refused.
    assert!(harness.engine.complete_service("req-1", "p-1").is_err());
}

// =============================================================================
// Rejects and validation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reject_is_silent_and_leaves_the_request_open() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let _provider_rx =
        harness.connect_provider("p-1", 19.0765, 72.8782, ServiceCategory::Painter);

    harness
        .engine
        .submit_request(harness.submit("req-1", "user-1", "painter"))
        .await
        .expect("submission failed");
    wait_for(&mut user_rx, "candidatesFound").await;

    let outcome = harness
        .engine
        .provider_responds("req-1", "p-1", ResponseDecision::Reject, None)
        .await
        .expect("reject failed");
    assert_eq!(outcome, ResponseOutcome::RejectRecorded);

    // Nothing reaches the requester and the request stays open.
    assert!(drain(&mut user_rx).is_empty());
    let request = harness.engine.lifecycle().get("req-1").expect("gone");
    assert_eq!(request.status, RequestStatus::ProvidersFound);
    assert!(request.assigned_provider_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn malformed_submissions_never_enter_the_lifecycle() {
    let harness = Harness::new();
    let _user_rx = harness.connect_user("user-1");

    let mut bad_category = harness.submit("req-1", "user-1", "gardener");
    let error = harness
        .engine
        .submit_request(bad_category.clone())
        .await
        .expect_err("unknown category must fail");
    assert!(error.to_string().contains("invalid service type"));

    bad_category.category = "plumber".to_string();
    bad_category.latitude = 123.0;
    let error = harness
        .engine
        .submit_request(bad_category)
        .await
        .expect_err("bad coordinates must fail");
    assert!(error.to_string().contains("coordinates"));

    let unregistered = harness.submit("req-2", "user-unknown", "plumber");
    assert!(harness.engine.submit_request(unregistered).await.is_err());

    assert!(harness.engine.lifecycle().is_empty());
}

// =============================================================================
// Provider presence updates
// =============================================================================

#[tokio::test(start_paused = true)]
async fn moving_provider_in_range_notifies_open_requests() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    // Registered and online, but outside every phase radius at submit time.
    let mut provider_rx =
        harness.connect_provider("p-roamer", 19.6000, 73.4000, ServiceCategory::Plumber);

    harness
        .engine
        .submit_request(harness.submit("req-1", "user-1", "plumber"))
        .await
        .expect("submission failed");
    wait_for(&mut user_rx, "searchStarted").await;

    // The provider drives into the neighborhood.
    harness
        .engine
        .update_provider_location("p-roamer", 19.0763, 72.8780, Some(12.0))
        .await
        .expect("location update failed");

    let ack = next_event(&mut provider_rx).await;
    assert_eq!(ack.name(), "locationUpdateConfirmed");

    let (in_range, _) = wait_for(&mut user_rx, "newProviderInRange").await;
    let OutboundEvent::NewProviderInRange {
        provider,
        distance_km,
        ..
    } = in_range
    else {
        panic!("wrong event");
    };
    assert_eq!(provider.id, "p-roamer");
    assert!(distance_km <= 1.0);
}

#[tokio::test(start_paused = true)]
async fn offline_toggle_reaches_requesters_with_open_requests() {
    let harness = Harness::new();
    let mut user_rx = harness.connect_user("user-1");
    let mut provider_rx =
        harness.connect_provider("p-1", 19.0765, 72.8782, ServiceCategory::Cleaning);

    harness
        .engine
        .submit_request(harness.submit("req-1", "user-1", "cleaning"))
        .await
        .expect("submission failed");
    wait_for(&mut user_rx, "candidatesFound").await;

    harness
        .engine
        .update_provider_online_status("p-1", false)
        .await
        .expect("status update failed");

    let acks = drain(&mut provider_rx)
        .into_iter()
        .filter(|e| e.name() == "statusUpdateConfirmed")
        .count();
    assert_eq!(acks, 1);

    let (changed, _) = wait_for(&mut user_rx, "providerStatusChanged").await;
    let OutboundEvent::ProviderStatusChanged { is_online, .. } = changed else {
        panic!("wrong event");
    };
    assert!(!is_online);
}
