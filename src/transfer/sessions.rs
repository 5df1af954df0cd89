//! Registry of in-flight imports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::StagingSession;

/// Source of the current time, injectable so expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Staging sessions keyed by id.
///
/// Cloning shares the underlying map. A session leaves the store through
/// [`SessionStore::take`] or [`SessionStore::expire`], never both, which is
/// what makes confirm and reject single-use.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, StagingSession>>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn insert(&self, session: StagingSession) {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.insert(session.id, session);
    }

    /// Remove and return a session. `None` if it never existed or was
    /// already finalized.
    pub fn take(&self, id: Uuid) -> Option<StagingSession> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.remove(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every session created more than `ttl` ago.
    pub fn expire(&self, ttl: Duration) -> Vec<StagingSession> {
        let cutoff = self.clock.now() - ttl;
        let mut sessions = self.sessions.lock().expect("session lock poisoned");

        let expired: Vec<Uuid> = sessions
            .values()
            .filter(|s| s.created_at <= cutoff)
            .map(|s| s.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| sessions.remove(&id))
            .collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .finish()
    }
}
