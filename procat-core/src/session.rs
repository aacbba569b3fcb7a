//! # Session Management
//!
//! Every client gets its own [`Registry`] + [`Invoker`] pair, keyed by an
//! opaque session id. Sessions are minted implicitly on first use, looked
//! up by the client-supplied id afterwards, and expired by a background
//! cleanup task once idle past the TTL.
//!
//! Locking discipline: the session map sits behind one `RwLock`; each
//! session's `last_used` timestamp sits behind its own `Mutex`, so a read
//! hit on the map can still record the touch without upgrading to the
//! map's write side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::invoker::Invoker;
use crate::registry::Registry;

/// Default time-to-live for idle sessions.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);
/// How often the cleanup task scans for expired sessions.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Session id length in bytes before hex encoding.
pub const SESSION_ID_LEN: usize = 16;

/// Tuning knobs for the session manager.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Per-session state: one registry and one invoker, plus timestamps.
pub struct SessionState {
    pub registry: Registry,
    pub invoker: Invoker,
    created_at: Instant,
    last_used: Mutex<Instant>,
}

impl SessionState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            registry: Registry::new(),
            invoker: Invoker::new(),
            created_at: now,
            last_used: Mutex::new(now),
        }
    }

    fn touch(&self) {
        let mut last_used = self.last_used.lock();
        // Keep the timestamp monotonically non-decreasing even if touches
        // race.
        let now = Instant::now();
        if now > *last_used {
            *last_used = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Session statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub oldest_session_age: Duration,
    pub newest_session_age: Duration,
}

/// Generates a new random session id (16 bytes, hex-encoded).
pub fn generate_id() -> String {
    let mut bytes = [0u8; SESSION_ID_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Owns the session map and the background cleanup task.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<SessionState>>>>,
    ttl: Duration,
    shutdown: watch::Sender<bool>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let sessions: Arc<RwLock<HashMap<String, Arc<SessionState>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let cleanup_task = tokio::spawn(cleanup_loop(
            Arc::clone(&sessions),
            config.ttl,
            config.cleanup_interval,
            shutdown_rx,
        ));

        Self {
            sessions,
            ttl: config.ttl,
            shutdown,
            cleanup_task: Mutex::new(Some(cleanup_task)),
        }
    }

    /// Returns the session for `id`, minting a fresh one when the id is
    /// empty, unknown, or absent. The effective id is always returned so
    /// callers can echo it back to the client.
    pub fn get_or_create(&self, id: Option<&str>) -> (Arc<SessionState>, String) {
        if let Some(id) = id
            && !id.is_empty()
        {
            let sessions = self.sessions.read();
            if let Some(state) = sessions.get(id) {
                state.touch();
                return (Arc::clone(state), id.to_string());
            }
        }

        let new_id = generate_id();
        let state = Arc::new(SessionState::new());
        self.sessions
            .write()
            .insert(new_id.clone(), Arc::clone(&state));
        (state, new_id)
    }

    /// Read-only lookup. A hit still counts as a use.
    pub fn get(&self, id: &str) -> Option<Arc<SessionState>> {
        let sessions = self.sessions.read();
        let state = sessions.get(id)?;
        state.touch();
        Some(Arc::clone(state))
    }

    /// Removes a session and closes its invoker.
    pub fn delete(&self, id: &str) {
        if let Some(state) = self.sessions.write().remove(id) {
            state.invoker.close();
        }
    }

    pub fn get_stats(&self) -> SessionStats {
        let sessions = self.sessions.read();
        let mut stats = SessionStats {
            active_sessions: sessions.len(),
            ..Default::default()
        };

        for state in sessions.values() {
            let age = state.age();
            if stats.oldest_session_age == Duration::ZERO || age > stats.oldest_session_age {
                stats.oldest_session_age = age;
            }
            if stats.newest_session_age == Duration::ZERO || age < stats.newest_session_age {
                stats.newest_session_age = age;
            }
        }

        stats
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stops the cleanup task (waiting for it to drain), closes every
    /// session's invoker, and empties the map.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.cleanup_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut sessions = self.sessions.write();
        for (_, state) in sessions.drain() {
            state.invoker.close();
        }
    }
}

async fn cleanup_loop(
    sessions: Arc<RwLock<HashMap<String, Arc<SessionState>>>>,
    ttl: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; skip it so a fresh manager
    // does not sweep at startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => cleanup(&sessions, ttl),
            _ = shutdown.changed() => return,
        }
    }
}

fn cleanup(sessions: &RwLock<HashMap<String, Arc<SessionState>>>, ttl: Duration) {
    let now = Instant::now();
    let mut sessions = sessions.write();
    sessions.retain(|id, state| {
        if state.idle_for(now) > ttl {
            tracing::debug!(session_id = %id, "expiring idle session");
            state.invoker.close();
            false
        } else {
            true
        }
    });
}
