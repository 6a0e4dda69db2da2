//! Engine counters for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic dispatch counters.
///
/// Updated with relaxed ordering; these feed dashboards and logs, never
/// control flow.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Requests admitted into the lifecycle store.
    pub requests_submitted: AtomicU64,
    /// Prior requests cancelled because the user submitted a new one.
    pub requests_superseded: AtomicU64,
    /// Request cards delivered to provider sessions.
    pub broadcasts_delivered: AtomicU64,
    /// Broadcasts skipped because the provider session was gone.
    pub broadcasts_skipped: AtomicU64,
    /// Accept races won.
    pub accepts_won: AtomicU64,
    /// Accept attempts that lost the race.
    pub accepts_lost: AtomicU64,
    /// Provider rejections recorded.
    pub rejects_recorded: AtomicU64,
    /// Requests cancelled by their user.
    pub cancellations: AtomicU64,
    /// Searches that resolved to timeout.
    pub timeouts: AtomicU64,
    /// Services completed.
    pub completions: AtomicU64,
}

impl EngineStats {
    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_superseded: self.requests_superseded.load(Ordering::Relaxed),
            broadcasts_delivered: self.broadcasts_delivered.load(Ordering::Relaxed),
            broadcasts_skipped: self.broadcasts_skipped.load(Ordering::Relaxed),
            accepts_won: self.accepts_won.load(Ordering::Relaxed),
            accepts_lost: self.accepts_lost.load(Ordering::Relaxed),
            rejects_recorded: self.rejects_recorded.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub requests_submitted: u64,
    pub requests_superseded: u64,
    pub broadcasts_delivered: u64,
    pub broadcasts_skipped: u64,
    pub accepts_won: u64,
    pub accepts_lost: u64,
    pub rejects_recorded: u64,
    pub cancellations: u64,
    pub timeouts: u64,
    pub completions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = EngineStats::default();
        stats.accepts_won.fetch_add(1, Ordering::Relaxed);
        stats.accepts_lost.fetch_add(2, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepts_won, 1);
        assert_eq!(snapshot.accepts_lost, 2);
        assert_eq!(snapshot.timeouts, 0);
    }
}
