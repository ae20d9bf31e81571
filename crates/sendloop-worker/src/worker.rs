//! The delivery pipeline behind the `DeliveryWorker` seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::{AutomationSurface, DeliveryWorker, SendOutcome};
use sendloop_core::types::{DeliveryOutcome, Message};
use sendloop_session::SessionManager;

/// Delivers messages through a per-user automation session.
pub struct AutomationWorker {
    sessions: Arc<SessionManager>,
    surface: Arc<dyn AutomationSurface>,
    /// Deadline for the send itself, session acquisition excluded — linking
    /// has its own timeout inside the session manager.
    attempt_timeout: Duration,
}

impl AutomationWorker {
    pub fn new(
        sessions: Arc<SessionManager>,
        surface: Arc<dyn AutomationSurface>,
        attempt_timeout: Duration,
    ) -> Self {
        Self { sessions, surface, attempt_timeout }
    }
}

#[async_trait]
impl DeliveryWorker for AutomationWorker {
    async fn deliver(&self, message: &Message) -> Result<DeliveryOutcome> {
        let lease = self.sessions.acquire(&message.user_id).await?;

        let attempt = tokio::time::timeout(
            self.attempt_timeout,
            self.surface
                .send_message(lease.handle(), &message.contact.phone, &message.content),
        )
        .await;

        // The session goes back to the pool before the outcome is
        // interpreted, so no branch below can leak it.
        self.sessions.release(lease);

        match attempt {
            Ok(Ok(SendOutcome::Delivered { receipt })) => {
                tracing::debug!("Message {} delivered, receipt {receipt}", message.id);
                Ok(DeliveryOutcome::Sent)
            }
            Ok(Ok(SendOutcome::Rejected { reason })) => {
                tracing::info!("Message {} rejected by channel: {reason}", message.id);
                Ok(DeliveryOutcome::Failed { reason })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SendloopError::Worker(format!(
                "Delivery attempt for message {} exceeded {}s",
                message.id,
                self.attempt_timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sendloop_core::config::SessionConfig;
    use sendloop_core::traits::SessionLinker;
    use sendloop_core::types::{Contact, MessageStatus, SessionHandle};
    use std::path::Path;
    use std::sync::Mutex;

    struct InstantLinker;

    #[async_trait]
    impl SessionLinker for InstantLinker {
        async fn link(&self, user_id: &str, _data_dir: &Path) -> Result<SessionHandle> {
            Ok(SessionHandle { user_id: user_id.to_string(), context_id: format!("ctx-{user_id}") })
        }
    }

    /// Scripted surface: pops one response per send.
    struct ScriptedSurface {
        script: Mutex<Vec<Result<SendOutcome>>>,
        delay: Duration,
    }

    impl ScriptedSurface {
        fn new(script: Vec<Result<SendOutcome>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script), delay: Duration::ZERO })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(vec![Ok(SendOutcome::Delivered { receipt: "r1".into() })]),
                delay,
            })
        }
    }

    #[async_trait]
    impl AutomationSurface for ScriptedSurface {
        async fn send_message(
            &self,
            _handle: &SessionHandle,
            _phone: &str,
            _content: &str,
        ) -> Result<SendOutcome> {
            tokio::time::sleep(self.delay).await;
            self.script.lock().unwrap().pop().expect("script exhausted")
        }

        async fn ping(&self, _handle: &SessionHandle) -> Result<()> {
            Ok(())
        }
    }

    fn message() -> Message {
        Message {
            id: "m1".into(),
            user_id: "u1".into(),
            contact: Contact { name: "Ada".into(), phone: "+15550001111".into() },
            content: "hi".into(),
            scheduled_at: Utc::now(),
            status: MessageStatus::Processing,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    fn worker(surface: Arc<ScriptedSurface>, dir: &tempfile::TempDir) -> AutomationWorker {
        let config = SessionConfig {
            linking_timeout_secs: 5,
            data_dir: dir.path().to_string_lossy().into_owned(),
        };
        let sessions = Arc::new(SessionManager::new(config, Arc::new(InstantLinker)));
        AutomationWorker::new(sessions, surface, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_delivered_maps_to_sent() {
        let dir = tempfile::tempdir().unwrap();
        let surface = ScriptedSurface::new(vec![Ok(SendOutcome::Delivered { receipt: "r1".into() })]);
        let worker = worker(surface, &dir);
        assert_eq!(worker.deliver(&message()).await.unwrap(), DeliveryOutcome::Sent);
    }

    #[tokio::test]
    async fn test_rejected_maps_to_failed_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let surface =
            ScriptedSurface::new(vec![Ok(SendOutcome::Rejected { reason: "unknown number".into() })]);
        let worker = worker(surface, &dir);
        match worker.deliver(&message()).await.unwrap() {
            DeliveryOutcome::Failed { reason } => assert_eq!(reason, "unknown number"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_surface_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let surface =
            ScriptedSurface::new(vec![Err(SendloopError::Channel("context lost".into()))]);
        let worker = worker(surface, &dir);
        assert!(worker.deliver(&message()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_a_worker_error() {
        let dir = tempfile::tempdir().unwrap();
        let surface = ScriptedSurface::slow(Duration::from_secs(3600));
        let worker = worker(surface, &dir);
        let err = worker.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, SendloopError::Worker(_)), "got: {err}");
    }

    struct NeverLinker;

    #[async_trait]
    impl SessionLinker for NeverLinker {
        async fn link(&self, _user_id: &str, _data_dir: &Path) -> Result<SessionHandle> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_linking_timeout_surfaces_as_session_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            linking_timeout_secs: 1,
            data_dir: dir.path().to_string_lossy().into_owned(),
        };
        let sessions = Arc::new(SessionManager::new(config, Arc::new(NeverLinker)));
        let surface = ScriptedSurface::new(vec![]);
        let worker = AutomationWorker::new(sessions, surface, Duration::from_secs(30));

        let err = worker.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, SendloopError::SessionTimeout(_)), "got: {err}");
    }

    #[tokio::test]
    async fn test_session_released_on_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let surface = ScriptedSurface::new(vec![
            Ok(SendOutcome::Delivered { receipt: "r3".into() }),
            Err(SendloopError::Channel("context lost".into())),
            Ok(SendOutcome::Rejected { reason: "blocked".into() }),
        ]);
        let worker = worker(surface, &dir);

        // Three deliveries in sequence: if any path leaked its lease, the
        // next acquire for the same user would hang forever.
        let _ = worker.deliver(&message()).await.unwrap();
        let _ = worker.deliver(&message()).await.unwrap_err();
        assert_eq!(worker.deliver(&message()).await.unwrap(), DeliveryOutcome::Sent);
    }
}
