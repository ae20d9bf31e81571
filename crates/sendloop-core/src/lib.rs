//! # Sendloop Core
//! Shared foundation for every Sendloop crate: the message data model and its
//! status state machine, the error taxonomy, the configuration system, and
//! the trait seams between the scheduler, store, session pool, and worker.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SendloopConfig;
pub use error::{Result, SendloopError};
pub use types::{Contact, DeliveryOutcome, Message, MessageStatus, NewMessage, SessionHandle};
