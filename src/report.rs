//! Read-side queries over the telemetry tables.
//!
//! Analytics rows are additive increments; totals are computed here, at query
//! time.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;

use crate::entity::user_session::{self, SessionStatus};
use crate::entity::{analytics, audit_log, performance_metric};
use crate::error::StoreError;
use crate::health::DualStoreGateway;
use crate::session::Session;
use crate::telemetry::AuditEntry;

/// Criteria for [`TelemetryReader::audit_trail`]. Unset fields match all.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricTotal {
    pub metric_type: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointLatency {
    pub endpoint: String,
    pub method: String,
    pub samples: i64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

#[derive(Clone)]
pub struct TelemetryReader {
    gateway: Arc<DualStoreGateway>,
}

impl TelemetryReader {
    pub fn new(gateway: Arc<DualStoreGateway>) -> Self {
        Self { gateway }
    }

    /// Audit entries matching `filter`, newest first.
    pub async fn audit_trail(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let mut query = audit_log::Entity::find();
        if let Some(actor_id) = filter.actor_id {
            query = query.filter(audit_log::Column::UserId.eq(actor_id));
        }
        if let Some(action) = filter.action {
            query = query.filter(audit_log::Column::Action.eq(action));
        }
        if let Some(resource_type) = filter.resource_type {
            query = query.filter(audit_log::Column::Resource.eq(resource_type));
        }
        if let Some(resource_id) = filter.resource_id {
            query = query.filter(audit_log::Column::ResourceId.eq(resource_id));
        }
        if let Some(success) = filter.success {
            query = query.filter(audit_log::Column::Success.eq(success));
        }
        if let Some(since) = filter.since {
            query = query.filter(audit_log::Column::Timestamp.gte(since));
        }
        if let Some(until) = filter.until {
            query = query.filter(audit_log::Column::Timestamp.lt(until));
        }
        let query = query
            .order_by_desc(audit_log::Column::Timestamp)
            .order_by_desc(audit_log::Column::Id)
            .limit(filter.limit);

        let conn = self.gateway.connection();
        let rows = self.gateway.guard(move || query.all(conn)).await?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// Sum of `count` per metric type over the days `since..=until`.
    pub async fn metric_totals(
        &self,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<MetricTotal>, StoreError> {
        let query = analytics::Entity::find()
            .select_only()
            .column(analytics::Column::MetricType)
            .column_as(
                SimpleExpr::from(Func::sum(Expr::col(analytics::Column::Count))),
                "total",
            )
            .filter(analytics::Column::Date.between(since, until))
            .group_by(analytics::Column::MetricType)
            .order_by_asc(analytics::Column::MetricType)
            .into_tuple::<(String, i64)>();

        let conn = self.gateway.connection();
        let rows = self.gateway.guard(move || query.all(conn)).await?;
        Ok(rows
            .into_iter()
            .map(|(metric_type, total)| MetricTotal { metric_type, total })
            .collect())
    }

    /// Sample count, mean and worst response time per endpoint and method.
    pub async fn endpoint_latency(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<EndpointLatency>, StoreError> {
        let query = performance_metric::Entity::find()
            .select_only()
            .column(performance_metric::Column::Endpoint)
            .column(performance_metric::Column::Method)
            .column_as(
                SimpleExpr::from(Func::count(Expr::col(performance_metric::Column::Id))),
                "samples",
            )
            .column_as(
                SimpleExpr::from(Func::avg(Expr::col(
                    performance_metric::Column::ResponseTime,
                ))),
                "avg_ms",
            )
            .column_as(
                SimpleExpr::from(Func::max(Expr::col(
                    performance_metric::Column::ResponseTime,
                ))),
                "max_ms",
            )
            .filter(performance_metric::Column::Timestamp.gte(since))
            .group_by(performance_metric::Column::Endpoint)
            .group_by(performance_metric::Column::Method)
            .order_by_asc(performance_metric::Column::Endpoint)
            .into_tuple::<(String, String, i64, f64, f64)>();

        let conn = self.gateway.connection();
        let rows = self.gateway.guard(move || query.all(conn)).await?;
        Ok(rows
            .into_iter()
            .map(|(endpoint, method, samples, avg_ms, max_ms)| EndpointLatency {
                endpoint,
                method,
                samples,
                avg_ms,
                max_ms,
            })
            .collect())
    }

    /// Active, unexpired sessions of `subject_id`, most recently used first.
    pub async fn active_sessions(&self, subject_id: &str) -> Result<Vec<Session>, StoreError> {
        let query = user_session::Entity::find()
            .filter(user_session::Column::UserId.eq(subject_id))
            .filter(user_session::Column::Status.eq(SessionStatus::Active))
            .filter(user_session::Column::ExpiresAt.gt(Utc::now()))
            .order_by_desc(user_session::Column::LastActivity);

        let conn = self.gateway.connection();
        let rows = self.gateway.guard(move || query.all(conn)).await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }
}
