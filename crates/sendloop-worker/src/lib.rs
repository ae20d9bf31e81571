//! # Sendloop Worker
//! Executes exactly one delivery attempt per message: borrow the user's
//! session, drive one send through the automation surface, classify the
//! result, and return the session — on every path.

pub mod surface;
pub mod worker;

pub use surface::BridgeSurface;
pub use worker::AutomationWorker;
