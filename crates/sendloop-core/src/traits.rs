//! Trait seams between the scheduler core and its collaborators.
//!
//! The message store and the automation surface are external collaborators:
//! Sendloop consumes them through these traits and ships default
//! implementations in `sendloop-store` and `sendloop-worker`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{DeliveryOutcome, Message, MessageStatus, NewMessage, SessionHandle};

/// Authoritative message list. Implementations must make per-id status
/// updates atomic and reject transitions the state machine forbids.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message as `Scheduled` and assign its ID.
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    async fn get(&self, id: &str) -> Result<Option<Message>>;

    async fn list(&self) -> Result<Vec<Message>>;

    /// Every message with `status == Scheduled` and `scheduled_at <= now`.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Message>>;

    /// Atomically move a message to `status`. Fails with a `Store` error if
    /// the current status does not allow the transition; the stored status
    /// is left untouched in that case.
    async fn set_status(&self, id: &str, status: MessageStatus) -> Result<()>;

    /// Like [`set_status`](MessageStore::set_status), also recording a
    /// failure reason the list query surfaces.
    async fn set_failed(&self, id: &str, status: MessageStatus, reason: &str) -> Result<()>;
}

/// Executes exactly one delivery attempt and classifies the result.
///
/// A returned `DeliveryOutcome::Failed` means the attempt was made and
/// definitively did not succeed. An `Err` means the pipeline itself broke;
/// the scheduler maps it to `FailedWorkerError`. Implementations must
/// release any session they borrow on every path.
#[async_trait]
pub trait DeliveryWorker: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<DeliveryOutcome>;
}

/// One send on the external automation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The surface accepted the message.
    Delivered { receipt: String },
    /// The surface completed the attempt and rejected it (unknown number,
    /// recipient unreachable). A handled failure, not an error.
    Rejected { reason: String },
}

/// Low-level "deliver one message using a session" capability. The mechanics
/// of driving the web surface live behind this seam.
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    async fn send_message(
        &self,
        handle: &SessionHandle,
        phone: &str,
        content: &str,
    ) -> Result<SendOutcome>;

    /// Cheap liveness probe for a context.
    async fn ping(&self, handle: &SessionHandle) -> Result<()>;
}

/// The one-time interactive step that brings a user's automation session to
/// `Ready`. Implementations restore persisted linking data from `data_dir`
/// when present and only fall back to interactive linking without it.
#[async_trait]
pub trait SessionLinker: Send + Sync {
    async fn link(&self, user_id: &str, data_dir: &Path) -> Result<SessionHandle>;
}
