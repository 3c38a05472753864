//! Bounded telemetry queue and the background writers that drain it.
//!
//! The request path only ever calls [`TelemetryQueue::push`], which never
//! blocks: when the queue is full the oldest event is evicted. Writers apply
//! events through the [`DualStoreGateway`] and never retry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use sea_orm::EntityTrait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::entity::{analytics, audit_log, performance_metric};
use crate::error::StoreError;
use crate::health::DualStoreGateway;
use crate::session;
use crate::telemetry::TelemetryEvent;

#[derive(Default)]
struct QueueState {
    events: VecDeque<TelemetryEvent>,
    in_flight: usize,
    closed: bool,
}

/// Bounded FIFO of pending telemetry writes with drop-oldest overflow.
pub struct TelemetryQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    ready: Notify,
    idle: Notify,
    overflowed: AtomicU64,
}

impl TelemetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            ready: Notify::new(),
            idle: Notify::new(),
            overflowed: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue without waiting. Returns the event that had to make room, if
    /// any; after [`close`](Self::close) the pushed event itself is returned.
    pub fn push(&self, event: TelemetryEvent) -> Option<TelemetryEvent> {
        let evicted = {
            let mut state = self.lock();
            if state.closed {
                return Some(event);
            }
            let evicted = if state.events.len() >= self.capacity {
                state.events.pop_front()
            } else {
                None
            };
            state.events.push_back(event);
            evicted
        };
        if evicted.is_some() {
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events evicted because the queue was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Stop accepting events. Workers exit once the backlog is drained.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_waiters();
    }

    /// Wait until every queued event has been taken and finished by a worker.
    ///
    /// Only returns while workers are running or the queue is already empty.
    pub async fn flush(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let state = self.lock();
                if state.events.is_empty() && state.in_flight == 0 {
                    return;
                }
            }
            idle.await;
        }
    }

    /// Take the next event, waiting for one. `None` once closed and drained.
    pub(crate) async fn next(&self) -> Option<TelemetryEvent> {
        loop {
            let ready = self.ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(event) = state.events.pop_front() {
                    state.in_flight += 1;
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Mark an event taken by [`next`](Self::next) as finished.
    pub(crate) fn done(&self) {
        let idle = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.events.is_empty() && state.in_flight == 0
        };
        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Applies telemetry events to the secondary store.
pub struct TelemetryWriter {
    gateway: Arc<DualStoreGateway>,
}

impl TelemetryWriter {
    pub fn new(gateway: Arc<DualStoreGateway>) -> Self {
        Self { gateway }
    }

    pub async fn write(&self, event: TelemetryEvent) -> Result<(), StoreError> {
        let conn = self.gateway.connection();
        match event {
            TelemetryEvent::Audit(entry) => {
                let model = entry.into_active_model();
                self.gateway
                    .guard(move || audit_log::Entity::insert(model).exec(conn))
                    .await?;
            }
            TelemetryEvent::Metric(metric) => {
                let model = metric.into_active_model();
                self.gateway
                    .guard(move || analytics::Entity::insert(model).exec(conn))
                    .await?;
            }
            TelemetryEvent::Performance(sample) => {
                let model = sample.into_active_model();
                self.gateway
                    .guard(move || performance_metric::Entity::insert(model).exec(conn))
                    .await?;
            }
            TelemetryEvent::Touch { session_id, at } => {
                let id = session_id.as_str();
                let touched = self
                    .gateway
                    .guard(move || session::persist_touch(conn, id, at))
                    .await?;
                debug!(session_id = %session_id, touched, "session activity recorded");
            }
        }
        Ok(())
    }
}

/// Marks the event taken by a worker as finished, however the write ends.
struct InFlight<'a>(&'a TelemetryQueue);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// The pool of writer tasks draining a [`TelemetryQueue`].
pub struct TelemetryWorkers {
    queue: Arc<TelemetryQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl TelemetryWorkers {
    /// Spawn `count` writer tasks (at least one).
    pub fn spawn(
        queue: Arc<TelemetryQueue>,
        gateway: Arc<DualStoreGateway>,
        count: usize,
    ) -> Self {
        let writer = Arc::new(TelemetryWriter::new(Arc::clone(&gateway)));
        let handles = (0..count.max(1))
            .map(|_| {
                let queue = Arc::clone(&queue);
                let writer = Arc::clone(&writer);
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    while let Some(event) = queue.next().await {
                        let _in_flight = InFlight(&*queue);
                        let category = event.category();
                        let writer = Arc::clone(&writer);
                        // a panicking write costs the event, not the worker
                        match tokio::spawn(async move { writer.write(event).await }).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => gateway.record_dropped(category, err),
                            Err(err) => gateway.record_dropped(category, err),
                        }
                    }
                })
            })
            .collect();

        Self { queue, handles }
    }

    /// Drain the backlog, then stop every writer.
    pub async fn shutdown(self) {
        self.queue.close();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
