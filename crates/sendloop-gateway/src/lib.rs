//! # Sendloop Gateway
//! HTTP API surface: schedule and cancel messages, poll delivery status,
//! and administer sessions. Status is polled — there is no push channel.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
