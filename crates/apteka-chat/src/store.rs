//! Slot-memory store: per-conversation state with idle expiry.
//!
//! A session idle past the soft TTL keeps its row but loses its history on
//! the next turn. Past the hard TTL the [`SessionSweeper`] deletes it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use apteka_core::config::{SessionConfig, MAX_SESSION_TTL_SECS};
use apteka_core::types::Session;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::ChatError;

// =============================================================================
// Policy
// =============================================================================

/// Retention limits applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub history_cap: usize,
    pub soft_ttl: Duration,
    pub hard_ttl: Duration,
}

impl SessionPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            history_cap: config.history_cap,
            soft_ttl: ttl(config.soft_ttl_secs),
            hard_ttl: ttl(config.hard_ttl_secs),
        }
    }
}

/// Clamped to [`MAX_SESSION_TTL_SECS`] so the conversion never wraps.
fn ttl(secs: u64) -> Duration {
    let secs = i64::try_from(secs.min(MAX_SESSION_TTL_SECS)).unwrap_or(i64::MAX);
    Duration::seconds(secs)
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Owner of all session state.
///
/// Implementations must keep each call atomic per session. Two turns racing
/// on the same id are not serialized beyond that: the later `update` wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session, creating it when the id is absent, blank or
    /// unknown. Refreshes `updated_at` and clears history if the session
    /// was idle past the soft TTL.
    async fn get_or_create(&self, id: Option<&str>) -> Result<Session, ChatError>;

    /// Store `session` as-is, replacing any previous version.
    async fn update(&self, session: Session) -> Result<(), ChatError>;

    /// Returns true if a session was removed.
    async fn delete(&self, id: &str) -> Result<bool, ChatError>;

    /// Delete sessions idle past the hard TTL and return how many went.
    async fn sweep_expired(&self) -> Result<usize, ChatError>;

    async fn len(&self) -> Result<usize, ChatError>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Single-process store guarded by one read/write lock over the whole map.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    policy: SessionPolicy,
}

impl InMemorySessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    fn poisoned(e: impl std::fmt::Display) -> ChatError {
        ChatError::Storage(format!("session lock poisoned: {}", e))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, id: Option<&str>) -> Result<Session, ChatError> {
        let now = Utc::now();
        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.write().map_err(Self::poisoned)?;
        let session = sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session_id = %id, "Creating session");
            Session::new(id.clone())
        });

        if now - session.updated_at > self.policy.soft_ttl && !session.history.is_empty() {
            debug!(session_id = %id, "Session idle past soft TTL, clearing history");
            session.history.clear();
        }
        session.updated_at = now;

        Ok(session.clone())
    }

    async fn update(&self, mut session: Session) -> Result<(), ChatError> {
        let cap = self.policy.history_cap;
        if session.history.len() > cap {
            let excess = session.history.len() - cap;
            session.history.drain(..excess);
        }
        let mut sessions = self.sessions.write().map_err(Self::poisoned)?;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, ChatError> {
        let mut sessions = self.sessions.write().map_err(Self::poisoned)?;
        Ok(sessions.remove(id).is_some())
    }

    async fn sweep_expired(&self) -> Result<usize, ChatError> {
        let cutoff = Utc::now() - self.policy.hard_ttl;
        let mut sessions = self.sessions.write().map_err(Self::poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        Ok(before - sessions.len())
    }

    async fn len(&self) -> Result<usize, ChatError> {
        let sessions = self.sessions.read().map_err(Self::poisoned)?;
        Ok(sessions.len())
    }
}

// =============================================================================
// Sweeper
// =============================================================================

/// Background task that periodically reclaims expired sessions.
pub struct SessionSweeper {
    store: Arc<dyn SessionStore>,
    interval: StdDuration,
    shutdown: Arc<Notify>,
}

impl SessionSweeper {
    pub fn new(store: Arc<dyn SessionStore>, interval: StdDuration) -> Self {
        Self {
            store,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run one sweep, logging instead of failing.
    pub async fn sweep_once(&self) -> usize {
        match self.store.sweep_expired().await {
            Ok(removed) => {
                debug!(removed, "Session sweep complete");
                removed
            }
            Err(e) => {
                error!(error = %e, "Session sweep failed");
                0
            }
        }
    }

    /// Sweep every `interval` until [`SessionSweeper::shutdown`] is called.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Session sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
                _ = self.shutdown.notified() => {
                    info!("Session sweeper stopped");
                    return;
                }
            }
        }
    }

    /// Signal the sweeper to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
