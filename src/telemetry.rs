//! Telemetry events written to the secondary store.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use serde::Serialize;
use serde_json::Value;

use crate::entity::{analytics, audit_log, performance_metric};

/// One audited action. Append-only once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Value,
    pub ip: String,
    pub user_agent: String,
    pub session_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// A successful, anonymous entry stamped now.
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            actor_id: None,
            actor_email: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            details: Value::Object(Default::default()),
            ip: String::new(),
            user_agent: String::new(),
            session_id: None,
            success: true,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_actor(mut self, id: impl Into<String>, email: Option<String>) -> Self {
        self.actor_id = Some(id.into());
        self.actor_email = email;
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip = ip.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub(crate) fn into_active_model(self) -> audit_log::ActiveModel {
        audit_log::ActiveModel {
            id: NotSet,
            user_id: Set(self.actor_id),
            user_email: Set(self.actor_email),
            action: Set(self.action),
            resource: Set(self.resource_type),
            resource_id: Set(self.resource_id),
            details: Set(self.details),
            ip_address: Set(self.ip),
            user_agent: Set(self.user_agent),
            session_id: Set(self.session_id),
            success: Set(self.success),
            error_message: Set(self.error_message),
            timestamp: Set(self.timestamp),
        }
    }
}

impl From<audit_log::Model> for AuditEntry {
    fn from(model: audit_log::Model) -> Self {
        Self {
            actor_id: model.user_id,
            actor_email: model.user_email,
            action: model.action,
            resource_type: model.resource,
            resource_id: model.resource_id,
            details: model.details,
            ip: model.ip_address,
            user_agent: model.user_agent,
            session_id: model.session_id,
            success: model.success,
            error_message: model.error_message,
            timestamp: model.timestamp,
        }
    }
}

/// An additive counter increment, bucketed by day and hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsMetric {
    pub date: NaiveDate,
    pub hour: Option<u32>,
    pub metric_type: String,
    pub count: i32,
    pub value: Option<f64>,
    pub actor_id: Option<String>,
    pub resource_id: Option<String>,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsMetric {
    /// A single-unit increment of `metric_type`, bucketed to the current hour.
    pub fn increment(metric_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            date: now.date_naive(),
            hour: Some(now.hour()),
            metric_type: metric_type.into(),
            count: 1,
            value: None,
            actor_id: None,
            resource_id: None,
            metadata: Value::Object(Default::default()),
            timestamp: now,
        }
    }

    pub fn with_count(mut self, count: i32) -> Self {
        self.count = count;
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Bucket by day only.
    pub fn daily(mut self) -> Self {
        self.hour = None;
        self
    }

    /// Re-stamp the increment, moving it to the matching day/hour bucket.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.date = timestamp.date_naive();
        if self.hour.is_some() {
            self.hour = Some(timestamp.hour());
        }
        self.timestamp = timestamp;
        self
    }

    pub(crate) fn into_active_model(self) -> analytics::ActiveModel {
        analytics::ActiveModel {
            id: NotSet,
            date: Set(self.date),
            hour: Set(self.hour.map(|h| h as i32)),
            metric_type: Set(self.metric_type),
            count: Set(self.count),
            value: Set(self.value),
            user_id: Set(self.actor_id),
            resource_id: Set(self.resource_id),
            metadata: Set(self.metadata),
            timestamp: Set(self.timestamp),
        }
    }
}

/// Timing of one handled request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: f64,
    pub cpu_gauge: Option<f64>,
    pub mem_gauge: Option<f64>,
    pub actor_id: Option<String>,
    pub ip: String,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub(crate) const METRIC_NAME: &'static str = "http_request";

    pub(crate) fn into_active_model(self) -> performance_metric::ActiveModel {
        performance_metric::ActiveModel {
            id: NotSet,
            metric_name: Set(Self::METRIC_NAME.to_string()),
            endpoint: Set(self.endpoint),
            method: Set(self.method),
            status_code: Set(i32::from(self.status_code)),
            response_time: Set(self.response_time_ms),
            cpu_usage: Set(self.cpu_gauge),
            memory_usage: Set(self.mem_gauge),
            user_id: Set(self.actor_id),
            ip_address: Set(self.ip),
            timestamp: Set(self.timestamp),
        }
    }
}

/// Unit of work for the background telemetry writers.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Audit(AuditEntry),
    Metric(AnalyticsMetric),
    Performance(PerformanceSample),
    /// Advance a session's `last_activity`.
    Touch {
        session_id: String,
        at: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    pub fn category(&self) -> &'static str {
        match self {
            TelemetryEvent::Audit(_) => "audit",
            TelemetryEvent::Metric(_) => "analytics",
            TelemetryEvent::Performance(_) => "performance",
            TelemetryEvent::Touch { .. } => "session_touch",
        }
    }
}
