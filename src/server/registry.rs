use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::SessionIdentity;

/// Active sessions, for the `/sessions` endpoint.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Active>>,
}

#[derive(Debug)]
struct Active {
    identity: SessionIdentity,
    device: String,
    started: Instant,
    stop: Arc<AtomicBool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub subject_id: String,
    pub quiz_id: String,
    pub device: String,
    pub uptime_secs: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegistrySnapshot {
    pub count: usize,
    pub sessions: Vec<SessionEntry>,
}

/// Removes its session from the registry on drop.
pub struct Registration {
    id: u64,
    stop: Arc<AtomicBool>,
    inner: Arc<Inner>,
}

impl Registration {
    /// Set by `SessionRegistry::stop_session`; the session loop polls it.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.inner.entries).remove(&self.id);
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: SessionIdentity, device: &str) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        lock(&self.inner.entries).insert(
            id,
            Active {
                identity,
                device: device.to_string(),
                started: Instant::now(),
                stop: Arc::clone(&stop),
            },
        );
        Registration {
            id,
            stop,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Signal every active session with this id to stop. Returns how many
    /// were signalled; entries leave the registry once their loops exit.
    pub fn stop_session(&self, session_id: &str) -> usize {
        let entries = lock(&self.inner.entries);
        let mut stopped = 0;
        for active in entries.values().filter(|a| a.identity.session_id == session_id) {
            active.stop.store(true, Ordering::SeqCst);
            stopped += 1;
        }
        stopped
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions ordered oldest first.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = lock(&self.inner.entries);
        let mut active: Vec<(&u64, &Active)> = entries.iter().collect();
        active.sort_by_key(|(id, _)| **id);
        let sessions: Vec<SessionEntry> = active
            .into_iter()
            .map(|(_, a)| SessionEntry {
                session_id: a.identity.session_id.clone(),
                subject_id: a.identity.subject_id.clone(),
                quiz_id: a.identity.quiz_id.clone(),
                device: a.device.clone(),
                uptime_secs: a.started.elapsed().as_secs_f64(),
            })
            .collect();
        RegistrySnapshot {
            count: sessions.len(),
            sessions,
        }
    }
}

fn lock(entries: &Mutex<HashMap<u64, Active>>) -> MutexGuard<'_, HashMap<u64, Active>> {
    match entries.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
