//! In-memory message store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::MessageStore;
use sendloop_core::types::{Message, MessageStatus, NewMessage};

/// HashMap-backed store. Status updates take the write lock for the whole
/// check-then-write, so per-id transitions are atomic.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<String, Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&self, id: &str, status: MessageStatus, reason: Option<&str>) -> Result<()> {
        let mut messages = self
            .messages
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let message = messages
            .get_mut(id)
            .ok_or_else(|| SendloopError::Store(format!("No such message: {id}")))?;
        if !message.status.can_transition_to(status) {
            return Err(SendloopError::Store(format!(
                "Illegal transition {} -> {} for message {id}",
                message.status, status
            )));
        }
        message.status = status;
        if let Some(reason) = reason {
            message.last_error = Some(reason.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: message.user_id,
            contact: message.contact,
            content: message.content,
            scheduled_at: message.scheduled_at,
            status: MessageStatus::Scheduled,
            created_at: Utc::now(),
            last_error: None,
        };
        let mut messages = self
            .messages
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let messages = self
            .messages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(messages.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Message>> {
        let messages = self
            .messages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut all: Vec<Message> = messages.values().cloned().collect();
        all.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(all)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Message>> {
        let messages = self
            .messages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut due: Vec<Message> = messages
            .values()
            .filter(|m| m.status == MessageStatus::Scheduled && m.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(due)
    }

    async fn set_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        self.transition(id, status, None)
    }

    async fn set_failed(&self, id: &str, status: MessageStatus, reason: &str) -> Result<()> {
        self.transition(id, status, Some(reason))
    }
}
