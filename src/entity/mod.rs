//! Sea-ORM entities for the secondary store.
//!
//! The secondary store holds everything this crate writes: audit entries,
//! analytics counters, request performance samples and session records.
//! It is independent from the application's primary entity store.

/// Append-only audit trail (`audit_logs`).
pub mod audit_log;

/// Additive analytics counters (`analytics`).
pub mod analytics;

/// Per-request latency samples (`performance_metrics`).
pub mod performance_metric;

/// Login sessions (`user_sessions`).
pub mod user_session;
