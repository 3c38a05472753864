//! Periodic purge of aged telemetry and session rows.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Condition;
use sea_orm::{ColumnTrait, DeleteResult, EntityTrait, QueryFilter};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::entity::user_session::{self, SessionStatus};
use crate::entity::{analytics, audit_log, performance_metric};
use crate::error::StoreError;
use crate::health::DualStoreGateway;
use crate::session::SessionStore;

/// Outcome of one retention run, one result per category.
///
/// Categories are processed independently; a failure in one does not stop
/// the others.
#[derive(Debug)]
pub struct RetentionReport {
    pub cutoff: DateTime<Utc>,
    pub sessions_expired: Result<u64, StoreError>,
    pub audit: Result<u64, StoreError>,
    pub analytics: Result<u64, StoreError>,
    pub performance: Result<u64, StoreError>,
    pub sessions_purged: Result<u64, StoreError>,
}

impl RetentionReport {
    /// Rows removed across all categories that succeeded.
    pub fn total_deleted(&self) -> u64 {
        [
            &self.audit,
            &self.analytics,
            &self.performance,
            &self.sessions_purged,
        ]
        .into_iter()
        .filter_map(|result| result.as_ref().ok())
        .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.sessions_expired.is_ok()
            && self.audit.is_ok()
            && self.analytics.is_ok()
            && self.performance.is_ok()
            && self.sessions_purged.is_ok()
    }
}

/// Per-category deletion counts, as exposed to callers that only need the
/// numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionCounts {
    pub audit: u64,
    pub analytics: u64,
    pub performance: u64,
    pub sessions: u64,
}

impl From<&RetentionReport> for RetentionCounts {
    fn from(report: &RetentionReport) -> Self {
        let count = |result: &Result<u64, StoreError>| *result.as_ref().unwrap_or(&0);
        Self {
            audit: count(&report.audit),
            analytics: count(&report.analytics),
            performance: count(&report.performance),
            sessions: count(&report.sessions_purged),
        }
    }
}

impl fmt::Display for RetentionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "audit={} analytics={} performance={} sessions={}",
            self.audit, self.analytics, self.performance, self.sessions
        )
    }
}

/// Deletes telemetry rows older than the retention cutoff and expired
/// sessions that closed before it.
///
/// Runs outside the request path. Deletes are not serialized against
/// concurrent inserts.
pub struct RetentionJob {
    gateway: Arc<DualStoreGateway>,
    sessions: SessionStore,
    config: RetentionConfig,
}

impl RetentionJob {
    pub fn new(
        gateway: Arc<DualStoreGateway>,
        sessions: SessionStore,
        config: RetentionConfig,
    ) -> Self {
        Self {
            gateway,
            sessions,
            config,
        }
    }

    /// Run one sweep against the current time.
    pub async fn run_once(&self) -> RetentionReport {
        self.run_once_at(Utc::now()).await
    }

    /// Run one sweep as if the current time were `now`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> RetentionReport {
        let cutoff = now - Duration::days(i64::from(self.config.retention_days));
        let conn = self.gateway.connection();

        let sessions_expired = self.sessions.sweep_expired().await;
        log_category("sessions_expired", &sessions_expired);

        let audit = self
            .deleted(move || {
                audit_log::Entity::delete_many()
                    .filter(audit_log::Column::Timestamp.lt(cutoff))
                    .exec(conn)
            })
            .await;
        log_category("audit", &audit);

        let analytics = self
            .deleted(move || {
                analytics::Entity::delete_many()
                    .filter(analytics::Column::Timestamp.lt(cutoff))
                    .exec(conn)
            })
            .await;
        log_category("analytics", &analytics);

        let performance = self
            .deleted(move || {
                performance_metric::Entity::delete_many()
                    .filter(performance_metric::Column::Timestamp.lt(cutoff))
                    .exec(conn)
            })
            .await;
        log_category("performance", &performance);

        let sessions_purged = self
            .deleted(move || {
                user_session::Entity::delete_many()
                    .filter(user_session::Column::Status.eq(SessionStatus::Expired))
                    .filter(
                        Condition::any()
                            .add(user_session::Column::LogoutAt.lt(cutoff))
                            .add(
                                Condition::all()
                                    .add(user_session::Column::LogoutAt.is_null())
                                    .add(user_session::Column::ExpiresAt.lt(cutoff)),
                            ),
                    )
                    .exec(conn)
            })
            .await;
        log_category("sessions", &sessions_purged);

        let report = RetentionReport {
            cutoff,
            sessions_expired,
            audit,
            analytics,
            performance,
            sessions_purged,
        };
        info!(
            cutoff = %report.cutoff,
            deleted = %RetentionCounts::from(&report),
            complete = report.is_complete(),
            "retention sweep finished"
        );
        report
    }

    async fn deleted<F, Fut>(&self, op: F) -> Result<u64, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<DeleteResult, sea_orm::DbErr>>,
    {
        self.gateway.guard(op).await.map(|r| r.rows_affected)
    }

    /// Schedule the job: first run after `initial_delay`, then every
    /// `interval` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.initial_delay).await;
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

fn log_category(category: &'static str, result: &Result<u64, StoreError>) {
    match result {
        Ok(rows) => info!(category, rows, "retention category processed"),
        Err(err) => warn!(category, error = %err, "retention category failed"),
    }
}
