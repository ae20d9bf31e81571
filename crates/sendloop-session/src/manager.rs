//! Thread-safe per-user session pool.
//!
//! One slot per user, guarded by an async mutex. Holding the slot lock is
//! both the linking single-flight (a second `acquire` for the same user
//! parks on the lock and observes the first linking's result) and the lease
//! (exactly one delivery attempt uses a user's handle at a time).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use sendloop_core::config::SessionConfig;
use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::SessionLinker;
use sendloop_core::types::SessionHandle;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    AwaitingLinking,
    Ready,
    Closed,
}

/// One user's session slot.
#[derive(Debug)]
struct Session {
    state: SessionState,
    handle: Option<SessionHandle>,
}

impl Session {
    fn fresh() -> Self {
        Self { state: SessionState::Uninitialized, handle: None }
    }
}

/// Exclusive borrow of a user's session for the duration of one send.
///
/// Obtained from [`SessionManager::acquire`], returned with
/// [`SessionManager::release`]. Dropping the lease releases it too, so a
/// handle can never leak past a worker call on any path.
#[derive(Debug)]
pub struct SessionLease {
    user_id: String,
    guard: tokio::sync::OwnedMutexGuard<Session>,
}

impl SessionLease {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The borrowed handle. Valid only while the lease is held.
    pub fn handle(&self) -> &SessionHandle {
        self.guard
            .handle
            .as_ref()
            .expect("lease exists only for Ready sessions")
    }
}

/// Pool status row for operational tooling.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    /// None while the slot lock is held (linking or mid-delivery).
    pub state: Option<SessionState>,
    pub busy: bool,
}

/// Owns every user's automation session.
pub struct SessionManager {
    slots: RwLock<HashMap<String, Arc<tokio::sync::Mutex<Session>>>>,
    linker: Arc<dyn SessionLinker>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig, linker: Arc<dyn SessionLinker>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            linker,
            config,
        }
    }

    /// Borrow the user's session, creating and linking it first if needed.
    ///
    /// A `Ready` session is returned as soon as its slot lock is free. An
    /// unlinked session goes `Uninitialized -> AwaitingLinking` and the
    /// caller blocks until linking finishes or `linking_timeout_secs`
    /// elapses, which fails with `SessionTimeout`.
    pub async fn acquire(&self, user_id: &str) -> Result<SessionLease> {
        loop {
            let slot = self.slot(user_id);
            let mut guard = slot.lock_owned().await;

            match guard.state {
                SessionState::Ready => {
                    return Ok(SessionLease { user_id: user_id.to_string(), guard });
                }
                SessionState::Closed => {
                    // Revoked while we were parked on the slot lock. The pool
                    // entry is already gone; start over with a fresh slot.
                    drop(guard);
                    continue;
                }
                SessionState::Uninitialized | SessionState::AwaitingLinking => {}
            }

            guard.state = SessionState::AwaitingLinking;
            let dir = self.user_dir(user_id)?;
            let window = Duration::from_secs(self.config.linking_timeout_secs);

            return match tokio::time::timeout(window, self.linker.link(user_id, &dir)).await {
                Ok(Ok(handle)) => {
                    guard.handle = Some(handle);
                    guard.state = SessionState::Ready;
                    tracing::info!("🔗 Session ready for user {user_id}");
                    Ok(SessionLease { user_id: user_id.to_string(), guard })
                }
                Ok(Err(e)) => {
                    guard.state = SessionState::Uninitialized;
                    Err(e)
                }
                Err(_) => {
                    guard.state = SessionState::Uninitialized;
                    Err(SendloopError::SessionTimeout(format!(
                        "Linking for user {user_id} did not complete within {}s",
                        self.config.linking_timeout_secs
                    )))
                }
            };
        }
    }

    /// Return a lease to the pool. The session stays linked; the next
    /// delivery for this user pays no session-creation cost.
    pub fn release(&self, lease: SessionLease) {
        tracing::trace!("Session released for user {}", lease.user_id);
        drop(lease);
    }

    /// Administrative revocation: close the session and drop it from the
    /// pool. Waits for a live lease to finish — an in-progress send is never
    /// aborted. The durable session directory is left on disk.
    pub async fn revoke(&self, user_id: &str) -> bool {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            slots.remove(user_id)
        };
        let Some(slot) = removed else { return false };
        let mut guard = slot.lock_owned().await;
        guard.state = SessionState::Closed;
        guard.handle = None;
        tracing::info!("Session for user {user_id} revoked");
        true
    }

    /// Pool snapshot for the admin surface.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let slots = self.slots.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut infos: Vec<SessionInfo> = slots
            .iter()
            .map(|(user_id, slot)| match slot.try_lock() {
                Ok(guard) => SessionInfo {
                    user_id: user_id.clone(),
                    state: Some(guard.state),
                    busy: false,
                },
                Err(_) => SessionInfo { user_id: user_id.clone(), state: None, busy: true },
            })
            .collect();
        infos.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        infos
    }

    /// Get or create the user's slot. The map lock is never held across an
    /// await — the slot Arc is cloned out first.
    fn slot(&self, user_id: &str) -> Arc<tokio::sync::Mutex<Session>> {
        {
            let slots = self.slots.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(slot) = slots.get(user_id) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::fresh())))
            .clone()
    }

    /// Durable per-user session directory, created on first use.
    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        let dir = self.config.data_dir().join(user_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLinker {
        links: AtomicUsize,
        delay: Duration,
    }

    impl CountingLinker {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self { links: AtomicUsize::new(0), delay })
        }
    }

    #[async_trait]
    impl SessionLinker for CountingLinker {
        async fn link(&self, user_id: &str, _data_dir: &Path) -> Result<SessionHandle> {
            self.links.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(SessionHandle {
                user_id: user_id.to_string(),
                context_id: format!("ctx-{user_id}"),
            })
        }
    }

    struct NeverLinker;

    #[async_trait]
    impl SessionLinker for NeverLinker {
        async fn link(&self, _user_id: &str, _data_dir: &Path) -> Result<SessionHandle> {
            std::future::pending().await
        }
    }

    fn config(dir: &tempfile::TempDir) -> SessionConfig {
        SessionConfig {
            linking_timeout_secs: 5,
            data_dir: dir.path().to_string_lossy().into_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_share_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let linker = CountingLinker::new(Duration::from_millis(100));
        let manager = Arc::new(SessionManager::new(config(&dir), linker.clone()));

        let (a, b) = {
            let m1 = manager.clone();
            let m2 = manager.clone();
            tokio::join!(
                async move {
                    let lease = m1.acquire("u1").await.unwrap();
                    let ctx = lease.handle().context_id.clone();
                    m1.release(lease);
                    ctx
                },
                async move {
                    let lease = m2.acquire("u1").await.unwrap();
                    let ctx = lease.handle().context_id.clone();
                    m2.release(lease);
                    ctx
                }
            )
        };

        assert_eq!(a, b);
        assert_eq!(linker.links.load(Ordering::SeqCst), 1, "second acquire must reuse the first session");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_session_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let linker = CountingLinker::new(Duration::ZERO);
        let manager = SessionManager::new(config(&dir), linker.clone());

        let lease = manager.acquire("u1").await.unwrap();
        manager.release(lease);
        let lease = manager.acquire("u1").await.unwrap();
        manager.release(lease);

        assert_eq!(linker.links.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linking_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(&dir), Arc::new(NeverLinker));

        let err = manager.acquire("u1").await.unwrap_err();
        assert!(matches!(err, SendloopError::SessionTimeout(_)), "got: {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let linker = CountingLinker::new(Duration::ZERO);
        let manager = Arc::new(SessionManager::new(config(&dir), linker));

        let lease = manager.acquire("u1").await.unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let lease = manager.acquire("u1").await.unwrap();
                manager.release(lease);
            })
        };

        // The second acquire cannot finish while the lease is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        manager.release(lease);
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_forces_relink() {
        let dir = tempfile::tempdir().unwrap();
        let linker = CountingLinker::new(Duration::ZERO);
        let manager = SessionManager::new(config(&dir), linker.clone());

        let lease = manager.acquire("u1").await.unwrap();
        manager.release(lease);
        assert!(manager.revoke("u1").await);
        assert!(!manager.revoke("u1").await);

        let lease = manager.acquire("u1").await.unwrap();
        manager.release(lease);
        assert_eq!(linker.links.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let linker = CountingLinker::new(Duration::ZERO);
        let manager = SessionManager::new(config(&dir), linker.clone());

        let a = manager.acquire("alice").await.unwrap();
        let b = manager.acquire("bob").await.unwrap();
        assert_ne!(a.handle().context_id, b.handle().context_id);
        manager.release(a);
        manager.release(b);
        assert_eq!(linker.links.load(Ordering::SeqCst), 2);
    }
}
