//! # Sendloop Scheduler
//! The delivery coordination core: a fixed-interval poll loop that finds due
//! messages, dispatches each exactly once under overlapping ticks, and
//! reconciles the worker's outcome back into message state.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval)
//!   ├── tick(now): find_due → in-flight guard → Processing → spawn dispatch
//!   ├── dispatch task: DeliveryWorker::deliver
//!   │     ├── Ok(Sent)     → status Sent
//!   │     ├── Ok(Failed)   → status Failed
//!   │     └── Err(_)       → status FailedWorkerError
//!   │   then: in-flight id removed (strictly after the status write)
//!   └── cancel(id): advisory in-flight cleanup, no abort of a live attempt
//! ```

pub mod engine;
pub mod inflight;

pub use engine::SchedulerEngine;
pub use inflight::InflightSet;
