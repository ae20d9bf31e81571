//! Scheduler engine — the poll loop that drives delivery of due messages
//! exactly once per due occurrence. Uses tokio::interval for zero-overhead
//! ticking; per-message dispatch runs as independent spawned tasks that
//! never block the loop or each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};

use sendloop_core::config::SchedulerConfig;
use sendloop_core::error::Result;
use sendloop_core::traits::{DeliveryWorker, MessageStore};
use sendloop_core::types::{DeliveryOutcome, Message, MessageStatus};

use crate::inflight::InflightSet;

/// The scheduler engine — polls the store, guards against duplicate
/// dispatch, and reconciles outcomes.
pub struct SchedulerEngine {
    store: Arc<dyn MessageStore>,
    worker: Arc<dyn DeliveryWorker>,
    inflight: InflightSet,
    /// Bounds concurrent in-flight deliveries; an over-budget tick leaves
    /// the rest of the due batch `Scheduled` for the next tick.
    permits: Arc<Semaphore>,
    config: SchedulerConfig,
    running: AtomicBool,
    stop: Notify,
    nudge: Notify,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        worker: Arc<dyn DeliveryWorker>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_inflight(store, worker, config, InflightSet::new())
    }

    /// Construct with an externally owned in-flight set, so tests can
    /// observe the guard while ticks run.
    pub fn with_inflight(
        store: Arc<dyn MessageStore>,
        worker: Arc<dyn DeliveryWorker>,
        config: SchedulerConfig,
        inflight: InflightSet,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_inflight.max(1)));
        Self {
            store,
            worker,
            inflight,
            permits,
            config,
            running: AtomicBool::new(false),
            stop: Notify::new(),
            nudge: Notify::new(),
        }
    }

    /// One poll pass: select every message that is `Scheduled`, due at
    /// `now`, and not already in flight, then dispatch each concurrently.
    /// Returns how many dispatches were started; never waits for any of
    /// them to complete.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.find_due(now).await?;
        let mut dispatched = 0;

        for message in due {
            // find_due filters both already, but the store is shared state:
            // re-check against the clone we actually got.
            if message.status != MessageStatus::Scheduled || message.scheduled_at > now {
                continue;
            }

            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                tracing::debug!("In-flight delivery budget exhausted, deferring rest of batch");
                break;
            };

            if !self.inflight.insert(&message.id) {
                // Still being delivered from an earlier tick.
                continue;
            }

            if let Err(e) = self.store.set_status(&message.id, MessageStatus::Processing).await {
                // Lost the race — typically canceled between find_due and
                // here. Undo the guard entry and move on.
                tracing::debug!("Message {} not dispatchable: {e}", message.id);
                self.inflight.remove(&message.id);
                continue;
            }

            dispatched += 1;
            let engine = self.clone();
            tokio::spawn(async move {
                engine.dispatch(message, permit).await;
            });
        }

        if dispatched > 0 {
            tracing::info!("🔔 Dispatched {dispatched} due message(s)");
        }
        Ok(dispatched)
    }

    /// Run one delivery and write the terminal status back. The in-flight
    /// id is removed strictly after the status write, so a concurrent
    /// cancel can never observe `Processing` with no in-flight marker.
    async fn dispatch(&self, message: Message, permit: tokio::sync::OwnedSemaphorePermit) {
        let write = match self.worker.deliver(&message).await {
            Ok(DeliveryOutcome::Sent) => {
                self.store.set_status(&message.id, MessageStatus::Sent).await
            }
            Ok(DeliveryOutcome::Failed { reason }) => {
                tracing::info!("Message {} failed: {reason}", message.id);
                self.store.set_failed(&message.id, MessageStatus::Failed, &reason).await
            }
            Err(e) => {
                tracing::warn!("⚠️ Worker error for message {}: {e}", message.id);
                self.store
                    .set_failed(&message.id, MessageStatus::FailedWorkerError, &e.to_string())
                    .await
            }
        };

        if let Err(e) = write {
            tracing::error!("Status write for message {} failed: {e}", message.id);
        }

        self.inflight.remove(&message.id);
        drop(permit);
    }

    /// Accept a message already persisted as `Scheduled`. No synchronous
    /// work happens here — the nudge only lets the loop pick it up without
    /// waiting out the rest of the current interval, and everything is
    /// equally correct if the nudge is lost.
    pub fn schedule(&self, message: &Message) {
        tracing::debug!("Message {} scheduled for {}", message.id, message.scheduled_at);
        self.nudge.notify_one();
    }

    /// Advisory cleanup for a canceled message: drop its in-flight marker
    /// unconditionally. The caller is responsible for only canceling
    /// messages still `Scheduled`; an attempt already under way is not
    /// aborted.
    pub fn cancel(&self, id: &str) {
        if self.inflight.remove(id) {
            tracing::debug!("In-flight marker for canceled message {id} cleared");
        }
    }

    /// Whether a message id is currently dispatched and unresolved.
    pub fn is_inflight(&self, id: &str) -> bool {
        self.inflight.contains(id)
    }

    /// Start the poll loop as a background task. Idempotent — a second
    /// start while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                "⏰ Scheduler started (poll every {}s, max {} in flight)",
                engine.config.poll_interval_secs,
                engine.config.max_inflight
            );
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                engine.config.poll_interval_secs.max(1),
            ));

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = engine.nudge.notified() => {}
                    _ = engine.stop.notified() => break,
                }
                if let Err(e) = engine.tick(Utc::now()).await {
                    tracing::error!("Scheduler tick failed: {e}");
                }
            }

            engine.running.store(false, Ordering::SeqCst);
            tracing::info!("⏰ Scheduler stopped");
        });
    }

    /// Stop the poll loop. In-flight dispatches are left to complete
    /// asynchronously — there is no drain guarantee.
    pub fn stop(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop.notify_one();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
