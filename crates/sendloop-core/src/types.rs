//! Message data model — the core types every crate shares.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery target. Opaque to the core beyond the check that a phone number
/// is present; the automation surface decides what the number means.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    /// Display name, free-form.
    pub name: String,
    /// Phone number in the channel's addressing format.
    pub phone: String,
}

/// A scheduled outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique ID, assigned by the store at insert. Immutable.
    pub id: String,
    /// Owner — selects which automation session delivers this message.
    pub user_id: String,
    /// Who the message goes to.
    pub contact: Contact,
    /// Payload. Opaque to the scheduler.
    pub content: String,
    /// When the message becomes due.
    pub scheduled_at: DateTime<Utc>,
    /// Current position in the state machine.
    pub status: MessageStatus,
    /// When the store accepted the message.
    pub created_at: DateTime<Utc>,
    /// Failure detail recorded alongside `Failed` / `FailedWorkerError`.
    pub last_error: Option<String>,
}

/// A schedule request before the store has assigned an ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub user_id: String,
    pub contact: Contact,
    pub content: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Message status. Transitions are monotonic along the edges checked by
/// [`MessageStatus::can_transition_to`]; a status never regresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for its scheduled time.
    Scheduled,
    /// Dispatched to a delivery worker; the scheduler will resolve it.
    Processing,
    /// Delivered.
    Sent,
    /// The attempt ran to completion and definitively did not succeed.
    Failed,
    /// The worker pipeline itself broke (session, surface, timeout).
    FailedWorkerError,
    /// Canceled by the user before dispatch.
    Canceled,
}

impl MessageStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// ```text
    /// Scheduled  --(due & dispatched)-->  Processing
    /// Processing --(delivered)-->         Sent
    /// Processing --(handled failure)-->   Failed
    /// Processing --(worker error)-->      FailedWorkerError
    /// Scheduled  --(user cancel)-->       Canceled
    /// ```
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Scheduled, Processing)
                | (Scheduled, Canceled)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, FailedWorkerError)
        )
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Scheduled | MessageStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Scheduled => "scheduled",
            MessageStatus::Processing => "processing",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::FailedWorkerError => "failed_worker_error",
            MessageStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(MessageStatus::Scheduled),
            "processing" => Some(MessageStatus::Processing),
            "sent" => Some(MessageStatus::Sent),
            "failed" => Some(MessageStatus::Failed),
            "failed_worker_error" => Some(MessageStatus::FailedWorkerError),
            "canceled" => Some(MessageStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one delivery attempt produced. `Failed` is a normal terminal
/// outcome — the attempt completed and the message did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed { reason: String },
}

/// Borrowed reference to a live automation context. Owned by the session
/// manager; the worker holds it only for the duration of one send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionHandle {
    pub user_id: String,
    /// Context identifier on the automation bridge. Opaque to everything
    /// except the surface that minted it.
    pub context_id: String,
}
