//! Radius queries over the provider population.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::snapshot::{ProviderSnapshot, ServiceCategory};
use super::store::ProfileStore;
use crate::geo::GeoPoint;
use crate::location::{LocationResolver, ResolvedLocation};

/// A provider matched by a radius query, with ranking metadata.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The provider record at query time.
    pub snapshot: ProviderSnapshot,
    /// The position the match was computed against.
    pub location: ResolvedLocation,
    /// Haversine distance from the request origin, kilometers.
    pub distance_km: f64,
    /// Ranking key with priority boosts applied. Sort order only.
    pub effective_km: f64,
}

/// Read-through candidate lookup over the profile store.
///
/// Stateless between queries: every call re-reads each candidate's record so
/// availability, categories and live location are always current.
pub struct ProviderDirectory {
    store: Arc<dyn ProfileStore>,
    resolver: LocationResolver,
}

impl ProviderDirectory {
    /// Creates a directory over the given store and resolver.
    pub fn new(store: Arc<dyn ProfileStore>, resolver: LocationResolver) -> Self {
        Self { store, resolver }
    }

    /// Returns the location resolver used for ranking.
    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    /// Finds providers eligible for a request within a radius.
    ///
    /// A provider qualifies when they serve `category`, are available, are
    /// not excluded, and have a resolvable location within `radius_km` of
    /// `origin`. Results are sorted online-first, then by ascending
    /// effective distance. Store failures for individual providers are
    /// logged and skipped so one bad record never sinks a whole phase.
    pub async fn find_candidates<I>(
        &self,
        origin: GeoPoint,
        category: ServiceCategory,
        radius_km: f64,
        candidate_ids: I,
        exclude: &HashSet<String>,
    ) -> Vec<Candidate>
    where
        I: IntoIterator<Item = String>,
    {
        let mut matches = Vec::new();

        for provider_id in candidate_ids {
            if exclude.contains(&provider_id) {
                continue;
            }

            let snapshot = match self.store.provider_snapshot(&provider_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    trace!(provider_id = %provider_id, "skipping: no profile record");
                    continue;
                }
                Err(error) => {
                    warn!(provider_id = %provider_id, %error, "skipping provider: store lookup failed");
                    continue;
                }
            };

            if !snapshot.service_categories.contains(&category) {
                continue;
            }
            if !snapshot.is_available {
                continue;
            }

            let Some(location) = self.resolver.resolve(&snapshot) else {
                trace!(provider_id = %provider_id, "skipping: no resolvable location");
                continue;
            };

            let distance_km = origin
                .distance_km(&GeoPoint::new(location.latitude, location.longitude));
            if distance_km > radius_km {
                continue;
            }

            let effective_km = self.resolver.effective_distance_km(
                distance_km,
                snapshot.is_online,
                location.source,
                location.accuracy_m,
            );

            matches.push(Candidate {
                snapshot,
                location,
                distance_km,
                effective_km,
            });
        }

        // Online providers outrank offline ones; effective distance breaks
        // ties within each group.
        matches.sort_by(|a, b| {
            b.snapshot
                .is_online
                .cmp(&a.snapshot.is_online)
                .then_with(|| {
                    a.effective_km
                        .partial_cmp(&b.effective_km)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        debug!(
            category = %category,
            radius_km,
            found = matches.len(),
            online = matches.iter().filter(|c| c.snapshot.is_online).count(),
            "candidate query complete"
        );

        matches
    }
}
