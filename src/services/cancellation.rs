//! In-flight solve registry.
//!
//! Tracks the re-solve currently running for each route together with its
//! trigger severity. A higher-severity trigger arriving mid-solve cancels
//! the running solve (which then returns `Cancelled` and leaves no partial
//! state) so the more urgent re-solve can take over. Cleanup is RAII-based
//! via `SolveGuard`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct SolveEntry {
    guard_id: u64,
    token: CancellationToken,
    severity: f64,
}

/// RAII guard for one in-flight solve. Must be held while the solve runs;
/// dropping it removes the registration.
pub struct SolveGuard {
    route_id: Uuid,
    guard_id: u64,
    pub token: CancellationToken,
    registry: SolveRegistry,
}

impl Drop for SolveGuard {
    fn drop(&mut self) {
        let mut entries = self.registry.entries.lock();
        if entries.get(&self.route_id).map(|e| e.guard_id) == Some(self.guard_id) {
            entries.remove(&self.route_id);
        }
    }
}

/// Thread-safe registry of in-flight solves, one slot per route.
#[derive(Clone, Default)]
pub struct SolveRegistry {
    entries: Arc<Mutex<HashMap<Uuid, SolveEntry>>>,
    next_guard_id: Arc<AtomicU64>,
}

impl SolveRegistry {
    /// Register a solve for `route_id` at the given severity.
    ///
    /// Returns:
    /// - `Some(guard)` — slot acquired; any lower-severity solve for the
    ///   route was cancelled and evicted
    /// - `None` — a solve of equal or higher severity is already running;
    ///   the caller backs off
    pub fn begin(&self, route_id: Uuid, severity: f64) -> Option<SolveGuard> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&route_id) {
            if existing.severity >= severity {
                return None;
            }
            existing.token.cancel();
        }

        let guard_id = self.next_guard_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entries.insert(route_id, SolveEntry { guard_id, token: token.clone(), severity });
        Some(SolveGuard {
            route_id,
            guard_id,
            token,
            registry: self.clone(),
        })
    }

    /// Is a solve currently registered for the route?
    pub fn is_running(&self, route_id: &Uuid) -> bool {
        self.entries.lock().contains_key(route_id)
    }

    /// Cancel whatever is running for the route, regardless of severity.
    pub fn cancel(&self, route_id: &Uuid) -> bool {
        match self.entries.lock().get(route_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }
}
