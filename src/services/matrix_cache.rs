//! Distance-matrix cache.
//!
//! Memoizes travel matrices keyed by the *set* of locations: the key is a
//! sha256 over the sorted, fixed-precision coordinate list, so lookups are
//! order-invariant. Entries expire after a configurable TTL (24 h default).
//! Matrices are stored in canonical (sorted) order and permuted back into the
//! caller's order on every hit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::services::routing::{RoutingError, RoutingProvider, TravelMatrices};
use crate::types::{Coordinates, VehicleKind};

const DEFAULT_TTL_SECS: u64 = 86_400;

/// Coordinate rounded to 6 decimal places (~0.1 m), the cache's identity unit.
fn coordinate_key(c: &Coordinates) -> (i64, i64) {
    ((c.lat * 1e6).round() as i64, (c.lng * 1e6).round() as i64)
}

/// Canonical ordering of a location set: sorted by rounded (lat, lng).
fn canonical_order(locations: &[Coordinates]) -> Vec<Coordinates> {
    let mut sorted = locations.to_vec();
    sorted.sort_by_key(coordinate_key);
    sorted
}

/// Deterministic cache key for an unordered location set.
pub fn matrix_key(locations: &[Coordinates]) -> String {
    let mut hasher = Sha256::new();
    for c in canonical_order(locations) {
        let (lat, lng) = coordinate_key(&c);
        hasher.update(lat.to_be_bytes());
        hasher.update(lng.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Re-index matrices expressed over `from` into the order of `to`.
fn permute(matrices: &TravelMatrices, from: &[Coordinates], to: &[Coordinates]) -> TravelMatrices {
    let index_of: HashMap<(i64, i64), usize> = from
        .iter()
        .enumerate()
        .map(|(idx, c)| (coordinate_key(c), idx))
        .collect();
    let mapping: Vec<usize> = to.iter().map(|c| index_of[&coordinate_key(c)]).collect();

    let n = to.len();
    let mut pick = |source: &Vec<Vec<u64>>| -> Vec<Vec<u64>> {
        let mut out = vec![vec![0u64; n]; n];
        for i in 0..n {
            for j in 0..n {
                out[i][j] = source[mapping[i]][mapping[j]];
            }
        }
        out
    };

    TravelMatrices {
        distances: pick(&matrices.distances),
        durations: pick(&matrices.durations),
        traffic_durations: pick(&matrices.traffic_durations),
        size: n,
    }
}

struct CacheEntry {
    locations: Vec<Coordinates>,
    matrices: TravelMatrices,
    expires_at: Instant,
}

/// TTL cache for travel matrices. Read-mostly; a writer lock is taken only on
/// insert and expiry cleanup.
pub struct MatrixCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for MatrixCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl MatrixCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Order-invariant lookup. Returns matrices permuted into the order of
    /// `locations` on a fresh hit, `None` on miss or expiry.
    pub fn get(&self, locations: &[Coordinates]) -> Option<TravelMatrices> {
        let key = matrix_key(locations);
        let entries = self.entries.read();
        let entry = entries.get(&key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        debug!("Matrix cache hit for {} locations", locations.len());
        Some(permute(&entry.matrices, &entry.locations, locations))
    }

    /// Store matrices computed over `locations` (any order).
    pub fn insert(&self, locations: &[Coordinates], matrices: &TravelMatrices) {
        let canonical = canonical_order(locations);
        let canonical_matrices = permute(matrices, locations, &canonical);
        let key = matrix_key(locations);
        self.entries.write().insert(
            key,
            CacheEntry {
                locations: canonical,
                matrices: canonical_matrices,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove expired entries (call periodically to free memory).
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached lookup, fetching through the provider on a miss.
    ///
    /// Miss path requests one matrix row per origin concurrently and
    /// assembles the full square before inserting.
    pub async fn get_or_fetch(
        &self,
        provider: &dyn RoutingProvider,
        locations: &[Coordinates],
        depart_at: chrono::DateTime<chrono::Utc>,
        kind: VehicleKind,
    ) -> Result<TravelMatrices, RoutingError> {
        if let Some(hit) = self.get(locations) {
            return Ok(hit);
        }

        let n = locations.len();
        let row_futures = locations
            .iter()
            .map(|origin| provider.matrix(std::slice::from_ref(origin), locations, depart_at, kind));
        let rows = futures::future::try_join_all(row_futures).await?;

        let mut distances = Vec::with_capacity(n);
        let mut durations = Vec::with_capacity(n);
        let mut traffic_durations = Vec::with_capacity(n);
        for row in rows {
            distances.push(row.distances.into_iter().next().unwrap_or_default());
            durations.push(row.durations.into_iter().next().unwrap_or_default());
            traffic_durations.push(row.traffic_durations.into_iter().next().unwrap_or_default());
        }

        let matrices = TravelMatrices {
            distances,
            durations,
            traffic_durations,
            size: n,
        };
        self.insert(locations, &matrices);
        Ok(matrices)
    }
}
