//! # Sendloop Session
//! Owns one persistent automation session per user. Sessions are lazily
//! created on the first delivery attempt, survive across deliveries, and are
//! destroyed only by explicit administrative revocation — never by a message
//! outcome.

pub mod linker;
pub mod manager;

pub use linker::BridgeLinker;
pub use manager::{SessionInfo, SessionLease, SessionManager, SessionState};
