//! # Identity and Telemetry Core for Axum with Sea-ORM
//!
//! Token authentication, session tracking and request telemetry for
//! [Axum](https://crates.io/crates/axum) applications, persisted through
//! [Sea-ORM](https://crates.io/crates/sea-orm) into a secondary store that is
//! kept apart from the application's own entity store.
//!
//! Telemetry must never cost the application latency or correctness: audit,
//! analytics and performance writes are queued and applied by background
//! workers, and while the secondary store is unreachable they are dropped and
//! counted instead of retried.
//!
//! ## Features
//!
//! - HS256 access and refresh tokens with distinct secrets and single-use
//!   refresh rotation
//! - Session records with device, browser and OS detection, logout and
//!   logout-everywhere
//! - One audit entry per mutating request, analytics counters per categorized
//!   action, and a latency sample for every request
//! - Store health tracking with fast-fail gating of every secondary-store call
//! - Named rate limiters, role and ownership guards, and a policy table
//! - Age-based retention of telemetry and expired sessions
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::post, Router};
//! use sea_orm::Database;
//! use tower_identity_seaorm::{CoreConfig, IdentityRuntime, Identity, SubjectDirectory};
//!
//! # async fn example(directory: Arc<dyn SubjectDirectory>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::from_env()?;
//! let conn = Database::connect(&config.secondary_store_url).await?;
//!
//! let runtime = IdentityRuntime::start(&config, conn, directory);
//!
//! // Every route is authenticated and observed
//! let api = Router::new().route(
//!     "/api/projects",
//!     post(|identity: Identity| async move { format!("created by {}", identity.subject.id) }),
//! );
//! let app = runtime.pipeline().wrap(api).merge(runtime.auth_router());
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guards
//!
//! ```no_run
//! use axum::{middleware::from_fn_with_state, routing::delete, Router};
//! use tower_identity_seaorm::{require_role, Role, RoleGuard};
//!
//! let admin: Router = Router::new()
//!     .route("/api/users/{id}", delete(|| async { "gone" }))
//!     .route_layer(from_fn_with_state(RoleGuard::new(&[Role::Admin]), require_role));
//! ```
//!
//! ## Schema
//!
//! With the `migration` feature (on by default) the tables are created by the
//! crate's own migrator:
//!
//! ```no_run
//! # #[cfg(feature = "migration")]
//! # async fn example(conn: &sea_orm::DatabaseConnection) -> Result<(), sea_orm::DbErr> {
//! use tower_identity_seaorm::migration::{Migrator, MigratorTrait};
//!
//! Migrator::up(conn, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod guard;
pub mod health;
pub mod identity;
#[cfg(feature = "migration")]
pub mod migration;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod report;
pub mod retention;
pub mod routes;
pub mod runtime;
pub mod service;
pub mod session;
pub mod sink;
pub mod telemetry;
pub mod token;
pub mod useragent;

pub use config::{ConfigError, CoreConfig, RateLimitConfig, RetentionConfig, TelemetryConfig, TokenConfig};
pub use dispatch::{TelemetryQueue, TelemetryWorkers};
pub use error::{AuthError, StoreError, TokenError};
pub use guard::{
    enforce_limit, require_ownership, require_role, LimitGuard, OwnershipGuard, ResourceLookup,
    RoleGuard,
};
pub use health::{DualStoreGateway, HealthProbe, HealthSnapshot, StoreHealth};
pub use identity::{Authentication, Identity, SubjectDirectory};
pub use pipeline::{AuditActor, AuditDetails, AuditRoutes, AuditTag, FailureDetail, Pipeline};
pub use policy::{Action, PolicyTable, ResourceRef, Role, Subject};
pub use rate_limit::{LimitRule, LimiterName, RateLimiters};
pub use report::{AuditFilter, TelemetryReader};
pub use retention::{RetentionJob, RetentionReport};
pub use routes::auth_router;
pub use runtime::{IdentityRuntime, RuntimeHealth};
pub use service::{AuthService, LoginInput, LoginOutput, RefreshOutput};
pub use session::{Session, SessionStore};
pub use sink::{AnalyticsSink, AuditSink, PerformanceSink, TelemetrySink};
pub use telemetry::{AnalyticsMetric, AuditEntry, PerformanceSample};
pub use token::{TokenPair, TokenService};
pub use useragent::{parse_user_agent, DeviceInfo};
