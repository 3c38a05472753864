//! Store reachability tracking.
//!
//! [`DualStoreGateway`] owns one [`StoreHealth`] flag per store. The flags are
//! refreshed by a background prober and flipped immediately when a driver call
//! fails with a connection error. Every secondary-store call goes through
//! [`DualStoreGateway::guard`], which refuses to touch the store while it is
//! marked down and bounds each call by a timeout.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Reachability flag and dropped-write counter for one store.
#[derive(Debug)]
pub struct StoreHealth {
    name: &'static str,
    connected: AtomicBool,
    dropped: AtomicU64,
}

impl StoreHealth {
    /// A store is assumed reachable until a probe or a call says otherwise.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            connected: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_up(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_up(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(store = self.name, "store reachable again");
        }
    }

    pub fn mark_down(&self, reason: &str) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!(store = self.name, reason, "store marked unreachable");
        }
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Writes skipped or lost since start-up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Something that can tell whether a store answers.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

#[async_trait]
impl HealthProbe for DatabaseConnection {
    async fn probe(&self) -> bool {
        self.ping().await.is_ok()
    }
}

/// Point-in-time view of store health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub primary_up: bool,
    pub secondary_up: bool,
    pub dropped_telemetry: u64,
}

/// Tracks reachability of the primary and secondary stores and gates every
/// secondary-store write.
pub struct DualStoreGateway {
    primary: StoreHealth,
    secondary: StoreHealth,
    connection: DatabaseConnection,
    primary_probe: Option<Arc<dyn HealthProbe>>,
    timeout: Duration,
}

impl DualStoreGateway {
    /// Create a gateway over the secondary store connection.
    ///
    /// `timeout` bounds every guarded call and every probe.
    pub fn new(connection: DatabaseConnection, timeout: Duration) -> Self {
        Self {
            primary: StoreHealth::new("primary"),
            secondary: StoreHealth::new("secondary"),
            connection,
            primary_probe: None,
            timeout,
        }
    }

    /// Probe the primary store as well; without one it is reported as up.
    pub fn with_primary_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.primary_probe = Some(probe);
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn primary(&self) -> &StoreHealth {
        &self.primary
    }

    pub fn secondary(&self) -> &StoreHealth {
        &self.secondary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a secondary-store operation under the gate with the default
    /// timeout.
    pub async fn guard<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        self.guard_with_timeout(self.timeout, op).await
    }

    /// Run a secondary-store operation under the gate.
    ///
    /// `op` builds the query. It is not called at all while the store is
    /// marked down, so a dead connection is never touched. A connection
    /// error marks the store down; a timeout only fails this call.
    pub async fn guard_with_timeout<T, F, Fut>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        if !self.secondary.is_up() {
            return Err(StoreError::Unavailable);
        }

        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if is_connection_error(&err) => {
                self.secondary.mark_down(&err.to_string());
                Err(StoreError::Unavailable)
            }
            Ok(Err(err)) => Err(StoreError::Backend(err)),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Note a telemetry write that did not happen.
    pub fn record_dropped(&self, category: &'static str, reason: impl fmt::Display) {
        self.secondary.record_drop();
        warn!(
            target: "telemetry",
            category,
            reason = %reason,
            dropped_total = self.secondary.dropped(),
            "dropped telemetry write"
        );
    }

    /// Probe both stores once and update the flags.
    pub async fn probe_once(&self) {
        let secondary_up = matches!(
            tokio::time::timeout(self.timeout, self.connection.probe()).await,
            Ok(true)
        );
        if secondary_up {
            self.secondary.mark_up();
        } else {
            self.secondary.mark_down("health probe failed");
        }

        if let Some(probe) = &self.primary_probe {
            let primary_up = matches!(
                tokio::time::timeout(self.timeout, probe.probe()).await,
                Ok(true)
            );
            if primary_up {
                self.primary.mark_up();
            } else {
                self.primary.mark_down("health probe failed");
            }
        }
        debug!(
            primary_up = self.primary.is_up(),
            secondary_up = self.secondary.is_up(),
            "store health probed"
        );
    }

    /// Probe on a fixed interval until the task is aborted.
    pub fn spawn_prober(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                gateway.probe_once().await;
            }
        })
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            primary_up: self.primary.is_up(),
            secondary_up: self.secondary.is_up(),
            dropped_telemetry: self.secondary.dropped(),
        }
    }
}

/// Whether a driver error means the store itself could not be reached.
pub fn is_connection_error(err: &DbErr) -> bool {
    matches!(err, DbErr::ConnectionAcquire(_) | DbErr::Conn(_))
}
