//! In-memory session store using moka
//!
//! Each client's `CalculationState` lives here between requests. Sessions
//! are never persisted; they expire after the configured idle time.

use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::engine::CalculationState;

/// Session cache keyed by session id
///
/// Every session sits behind its own lock so concurrent updates to one
/// session apply one after another.
#[derive(Clone)]
pub struct SessionCache {
    sessions: Cache<Uuid, Arc<Mutex<CalculationState>>>,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` sessions, each evicted after
    /// `idle` without access
    pub fn new(capacity: u64, idle: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(idle)
                .build(),
        }
    }

    /// Start a fresh session in `Idle` mode
    pub async fn create(&self) -> CalculationState {
        let state = CalculationState::new();
        self.sessions
            .insert(state.id(), Arc::new(Mutex::new(state.clone())))
            .await;
        info!("Session created: {}", state.id());
        state
    }

    /// Snapshot of a session's state
    pub async fn get(&self, id: Uuid) -> Option<CalculationState> {
        let session = self.sessions.get(&id).await?;
        let state = session.lock().await.clone();
        Some(state)
    }

    /// Apply `update` to a session while holding its lock.
    ///
    /// The update works on a copy; the stored state only changes when it
    /// succeeds. Returns `None` for an unknown session.
    pub async fn update<F, E>(&self, id: Uuid, update: F) -> Option<Result<CalculationState, E>>
    where
        F: FnOnce(&mut CalculationState) -> Result<(), E>,
    {
        let session = self.sessions.get(&id).await?;
        let mut stored = session.lock().await;
        let mut next = stored.clone();
        Some(update(&mut next).map(|()| {
            *stored = next.clone();
            next
        }))
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.remove(&id).await.is_some();
        if removed {
            info!("Session removed: {}", id);
        }
        removed
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            sessions: self.sessions.entry_count(),
        }
    }
}

/// Cache statistics for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub sessions: u64,
}
