//! Registry of live sessions.
//!
//! Each session sits behind its own mutex, so at most one thread works on
//! a session at a time while different sessions proceed in parallel.

use crate::error::{ServerError, ServerResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncml_engine::Session;
use tracing::{debug, info};

/// A hosted session.
#[derive(Debug)]
pub struct SessionSlot {
    session: Mutex<Session>,
    last_used: Mutex<Instant>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Locks the session for one request.
    ///
    /// Blocks while another thread holds it.
    pub fn enter(&self) -> MutexGuard<'_, Session> {
        let guard = self.session.lock();
        *self.last_used.lock() = Instant::now();
        guard
    }

    /// Returns when the session was last entered.
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }
}

/// Sessions by key.
#[derive(Debug)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout,
        }
    }

    /// Returns the session under `key`, creating it with `create` if absent.
    ///
    /// # Errors
    ///
    /// Returns `TooManySessions` when a new session would exceed the limit.
    pub fn get_or_create(
        &self,
        key: &str,
        create: impl FnOnce() -> Session,
    ) -> ServerResult<Arc<SessionSlot>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Ok(Arc::clone(slot));
        }
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(key) {
            return Ok(Arc::clone(slot));
        }
        if slots.len() >= self.max_sessions {
            return Err(ServerError::TooManySessions(self.max_sessions));
        }
        let slot = Arc::new(SessionSlot::new(create()));
        slots.insert(key.to_string(), Arc::clone(&slot));
        debug!(session = key, active = slots.len(), "session created");
        Ok(slot)
    }

    /// Returns the session under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<SessionSlot>> {
        self.slots.read().get(key).cloned()
    }

    /// Forgets a session. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.slots.write().remove(key).is_some()
    }

    /// Returns the number of hosted sessions.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if no session is hosted.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Drops sessions idle for longer than the timeout.
    ///
    /// Sessions currently entered are kept. Returns the number dropped.
    pub fn expire_idle(&self) -> usize {
        self.expire_idle_at(Instant::now())
    }

    fn expire_idle_at(&self, now: Instant) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|key, slot| {
            let idle = now.saturating_duration_since(slot.last_used()) >= self.idle_timeout;
            let expired = idle && !slot.session.is_locked();
            if expired {
                info!(session = %key, "idle session dropped");
            }
            !expired
        });
        before - slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_engine::{MemoryBackendFactory, MemoryResumeStore, SessionConfig};

    fn session(id: &str) -> Session {
        Session::new(
            SessionConfig::server("http://sync.example.com"),
            id,
            Arc::new(MemoryBackendFactory::new()),
            Arc::new(MemoryResumeStore::new()),
        )
    }

    #[test]
    fn lookup_returns_the_same_session() {
        let registry = SessionRegistry::new(10, Duration::from_secs(60));
        let a = registry.get_or_create("dev/1", || session("1")).unwrap();
        let b = registry
            .get_or_create("dev/1", || panic!("session created twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("dev/2").is_none());
    }

    #[test]
    fn session_limit() {
        let registry = SessionRegistry::new(1, Duration::from_secs(60));
        registry.get_or_create("dev/1", || session("1")).unwrap();
        let err = registry.get_or_create("dev/2", || session("2")).unwrap_err();
        assert!(matches!(err, ServerError::TooManySessions(1)));

        assert!(registry.remove("dev/1"));
        assert!(!registry.remove("dev/1"));
        assert!(registry.is_empty());
        registry.get_or_create("dev/2", || session("2")).unwrap();
    }

    #[test]
    fn idle_sessions_expire() {
        let registry = SessionRegistry::new(10, Duration::from_secs(60));
        registry.get_or_create("dev/1", || session("1")).unwrap();
        registry.get_or_create("dev/2", || session("2")).unwrap();

        assert_eq!(registry.expire_idle(), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(registry.expire_idle_at(later), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn entered_sessions_do_not_expire() {
        let registry = SessionRegistry::new(10, Duration::from_secs(60));
        let slot = registry.get_or_create("dev/1", || session("1")).unwrap();
        let later = Instant::now() + Duration::from_secs(61);

        let guard = slot.enter();
        assert_eq!(guard.session_id(), "1");
        assert_eq!(registry.expire_idle_at(later), 0);
        drop(guard);
        assert_eq!(registry.expire_idle_at(later), 1);
    }

    #[test]
    fn one_thread_per_session() {
        let registry = Arc::new(SessionRegistry::new(10, Duration::from_secs(60)));
        let slot = registry.get_or_create("dev/1", || session("1")).unwrap();
        let guard = slot.enter();

        let other = Arc::clone(&slot);
        let handle = std::thread::spawn(move || other.session.try_lock().is_none());
        assert!(handle.join().unwrap());
        drop(guard);
        assert!(slot.session.try_lock().is_some());
    }
}
