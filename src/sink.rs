//! Fire-and-forget telemetry sinks.
//!
//! A sink never awaits the store and never returns an error: `record` either
//! enqueues the event for the background writers or, while the secondary
//! store is marked down, drops it with a local log line.

use std::sync::Arc;

use crate::dispatch::TelemetryQueue;
use crate::error::StoreError;
use crate::health::DualStoreGateway;
use crate::telemetry::{AnalyticsMetric, AuditEntry, PerformanceSample, TelemetryEvent};

/// Destination for one kind of telemetry event.
pub trait TelemetrySink: Send + Sync {
    type Event;

    /// Hand `event` off without waiting on the store.
    fn record(&self, event: Self::Event);
}

/// Shared enqueue path for the three sinks.
#[derive(Clone)]
struct Dispatcher {
    queue: Arc<TelemetryQueue>,
    gateway: Arc<DualStoreGateway>,
}

impl Dispatcher {
    fn dispatch(&self, event: TelemetryEvent) {
        if !self.gateway.secondary().is_up() {
            self.gateway
                .record_dropped(event.category(), StoreError::Unavailable);
            return;
        }
        if let Some(evicted) = self.queue.push(event) {
            self.gateway
                .record_dropped(evicted.category(), "telemetry queue full");
        }
    }
}

/// Records one [`AuditEntry`] per audited action.
#[derive(Clone)]
pub struct AuditSink {
    inner: Dispatcher,
}

impl AuditSink {
    pub fn new(queue: Arc<TelemetryQueue>, gateway: Arc<DualStoreGateway>) -> Self {
        Self {
            inner: Dispatcher { queue, gateway },
        }
    }
}

impl TelemetrySink for AuditSink {
    type Event = AuditEntry;

    fn record(&self, entry: AuditEntry) {
        self.inner.dispatch(TelemetryEvent::Audit(entry));
    }
}

/// Records additive [`AnalyticsMetric`] increments.
#[derive(Clone)]
pub struct AnalyticsSink {
    inner: Dispatcher,
}

impl AnalyticsSink {
    pub fn new(queue: Arc<TelemetryQueue>, gateway: Arc<DualStoreGateway>) -> Self {
        Self {
            inner: Dispatcher { queue, gateway },
        }
    }

    /// Shorthand for a single-unit increment of `metric_type`.
    pub fn increment(&self, metric_type: &str) {
        self.record(AnalyticsMetric::increment(metric_type));
    }
}

impl TelemetrySink for AnalyticsSink {
    type Event = AnalyticsMetric;

    fn record(&self, metric: AnalyticsMetric) {
        self.inner.dispatch(TelemetryEvent::Metric(metric));
    }
}

/// Records one [`PerformanceSample`] per handled request.
#[derive(Clone)]
pub struct PerformanceSink {
    inner: Dispatcher,
}

impl PerformanceSink {
    pub fn new(queue: Arc<TelemetryQueue>, gateway: Arc<DualStoreGateway>) -> Self {
        Self {
            inner: Dispatcher { queue, gateway },
        }
    }
}

impl TelemetrySink for PerformanceSink {
    type Event = PerformanceSample;

    fn record(&self, sample: PerformanceSample) {
        self.inner.dispatch(TelemetryEvent::Performance(sample));
    }
}
