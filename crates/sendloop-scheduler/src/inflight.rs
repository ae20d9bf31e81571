//! The in-flight set — the duplicate-dispatch guard.
//!
//! Keyed by message id, not message identity: the store may hand out fresh
//! clones on every poll. Owned by a scheduler instance and injectable, so
//! tests can construct independent schedulers and instrument the set.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Concurrency-safe set of message ids currently dispatched and unresolved.
/// The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct InflightSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InflightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an id in flight. Returns false if it already was — the caller
    /// must then skip dispatch.
    pub fn insert(&self, id: &str) -> bool {
        self.lock().insert(id.to_string())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
