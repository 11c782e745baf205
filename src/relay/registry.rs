//! # Session Registry
//!
//! Process-wide map from session identifier to [`RelaySession`]. Active
//! sessions are limited by `max_concurrent_sessions` and identifiers must be
//! unique among them.
//!
//! Closed sessions stay in the map so the health aggregator can tell an idle
//! relay from one whose last session failed. Only the newest
//! `retained_closed_sessions` closed records are kept; older ones are
//! dropped in closing order. An operator can also drop a closed record early
//! through [`SessionRegistry::unregister`].

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::relay::RelaySession;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct SessionRegistry {
    entries: RwLock<Entries>,
    max_active: usize,
    retained_closed: usize,
}

#[derive(Debug, Default)]
struct Entries {
    sessions: HashMap<String, Arc<RelaySession>>,
    /// Closed identifiers, oldest first.
    closed: VecDeque<String>,
}

impl Entries {
    fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    fn admit(&self, session_id: &str, max_active: usize) -> RelayResult<()> {
        if self
            .sessions
            .get(session_id)
            .is_some_and(|existing| existing.is_active())
        {
            return Err(RelayError::DuplicateSession(session_id.to_string()));
        }
        if self.active_count() >= max_active {
            return Err(RelayError::SessionLimit(max_active));
        }
        Ok(())
    }

    fn remove(&mut self, session_id: &str) -> Option<Arc<RelaySession>> {
        self.closed.retain(|id| id != session_id);
        self.sessions.remove(session_id)
    }

    fn prune(&mut self, keep: usize) {
        while self.closed.len() > keep {
            let Some(oldest) = self.closed.front().cloned() else {
                break;
            };
            debug!(session_id = %oldest, "Dropping closed session record");
            self.remove(&oldest);
        }
    }
}

impl SessionRegistry {
    pub fn new(max_active: usize, retained_closed: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            max_active,
            retained_closed,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.max_concurrent_sessions, config.retained_closed_sessions)
    }

    /// Would a new active session with this identifier be accepted right now?
    pub fn check_admission(&self, session_id: &str) -> RelayResult<()> {
        self.entries.read().admit(session_id, self.max_active)
    }

    /// Add a session. An active session is subject to the limit and to
    /// identifier uniqueness; a closed one (a session that failed to connect)
    /// is kept as a closed record. Either replaces a closed record with the
    /// same identifier.
    pub fn register(&self, session: Arc<RelaySession>) -> RelayResult<()> {
        let mut entries = self.entries.write();
        let id = session.id().to_string();

        if session.is_active() {
            entries.admit(&id, self.max_active)?;
        } else if entries.sessions.get(&id).is_some_and(|s| s.is_active()) {
            return Err(RelayError::DuplicateSession(id));
        }

        let closed = !session.is_active();
        entries.remove(&id);
        entries.sessions.insert(id.clone(), session);

        if closed {
            entries.closed.push_back(id);
            entries.prune(self.retained_closed);
        }
        Ok(())
    }

    /// Drop a closed record. An active session cannot be unregistered: it
    /// leaves the active set only through its own teardown.
    pub fn unregister(&self, session_id: &str) -> RelayResult<Option<Arc<RelaySession>>> {
        let mut entries = self.entries.write();
        if entries.sessions.get(session_id).is_some_and(|s| s.is_active()) {
            return Err(RelayError::DuplicateSession(session_id.to_string()));
        }
        Ok(entries.remove(session_id))
    }

    /// Move a session that has just closed to the closed records. Does
    /// nothing unless this exact session is the registered one.
    pub fn retire(&self, session: &RelaySession) {
        let mut entries = self.entries.write();
        let registered = entries
            .sessions
            .get(session.id())
            .is_some_and(|s| std::ptr::eq(s.as_ref(), session));
        if !registered {
            return;
        }

        let id = session.id().to_string();
        entries.closed.retain(|closed| closed != &id);
        entries.closed.push_back(id);
        entries.prune(self.retained_closed);
    }

    pub fn active_count(&self) -> usize {
        self.entries.read().active_count()
    }

    /// True if any closed record carries an error.
    pub fn any_closed_with_error(&self) -> bool {
        self.entries
            .read()
            .sessions
            .values()
            .any(|s| !s.is_active() && s.last_error().is_some())
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RelaySession>> {
        self.entries.read().sessions.get(session_id).cloned()
    }

    /// All records, ordered by identifier.
    pub fn sessions(&self) -> Vec<Arc<RelaySession>> {
        let mut sessions: Vec<_> = self.entries.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }
}
