//! Wires the core together from configuration.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::CoreConfig;
use crate::dispatch::{TelemetryQueue, TelemetryWorkers};
use crate::health::DualStoreGateway;
use crate::identity::SubjectDirectory;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::rate_limit::RateLimiters;
use crate::report::TelemetryReader;
use crate::retention::RetentionJob;
use crate::service::AuthService;
use crate::session::SessionStore;
use crate::token::TokenService;

/// Health of the stores and the telemetry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeHealth {
    pub primary_up: bool,
    pub secondary_up: bool,
    /// Telemetry writes skipped or lost, including queue overflow.
    pub dropped_telemetry: u64,
    /// Events evicted because the queue was full.
    pub queue_overflow: u64,
    pub queued: usize,
}

/// The running identity and telemetry core.
///
/// Owns the background tasks: telemetry writers, the store health prober and
/// the retention job. Must be started inside a tokio runtime.
///
/// ```no_run
/// use std::sync::Arc;
/// use axum::{routing::get, Router};
/// use sea_orm::Database;
/// use tower_identity_seaorm::{CoreConfig, IdentityRuntime, SubjectDirectory};
///
/// # async fn example(directory: Arc<dyn SubjectDirectory>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = CoreConfig::from_env()?;
/// let conn = Database::connect(&config.secondary_store_url).await?;
/// let runtime = IdentityRuntime::start(&config, conn, directory);
///
/// let app = runtime
///     .pipeline()
///     .wrap(Router::new().route("/api/projects", get(|| async { "[]" })))
///     .merge(runtime.auth_router());
/// # let _ = app;
/// runtime.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct IdentityRuntime {
    gateway: Arc<DualStoreGateway>,
    queue: Arc<TelemetryQueue>,
    workers: TelemetryWorkers,
    background: Vec<JoinHandle<()>>,
    pipeline: Pipeline,
    limiters: RateLimiters,
}

impl IdentityRuntime {
    pub fn start(
        config: &CoreConfig,
        connection: DatabaseConnection,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Self {
        let gateway = DualStoreGateway::new(connection, config.store_timeout);
        Self::start_with_gateway(config, gateway, directory, |builder| builder)
    }

    /// Start over a prepared gateway (e.g. one with a primary-store probe),
    /// letting `customize` adjust the pipeline before it is built.
    pub fn start_with_gateway<F>(
        config: &CoreConfig,
        gateway: DualStoreGateway,
        directory: Arc<dyn SubjectDirectory>,
        customize: F,
    ) -> Self
    where
        F: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        let gateway = Arc::new(gateway);
        let queue = Arc::new(TelemetryQueue::new(config.telemetry.queue_capacity));
        let workers = TelemetryWorkers::spawn(
            Arc::clone(&queue),
            Arc::clone(&gateway),
            config.telemetry.workers,
        );

        let tokens = Arc::new(TokenService::new(&config.tokens));
        let sessions = SessionStore::new(
            Arc::clone(&gateway),
            Arc::clone(&queue),
            config.session_ttl,
        );
        let limiters = RateLimiters::in_memory(config.rate_limits.rules.clone());
        let auth = AuthService::new(tokens, sessions.clone(), directory)
            .with_limiters(limiters.clone());

        let builder = Pipeline::builder(auth, Arc::clone(&queue), Arc::clone(&gateway))
            .global_limit(limiters.clone());
        let pipeline = customize(builder).build();

        let prober = gateway.spawn_prober(config.health_probe_interval);
        let retention =
            RetentionJob::new(Arc::clone(&gateway), sessions, config.retention.clone()).spawn();

        info!(
            workers = config.telemetry.workers,
            queue_capacity = config.telemetry.queue_capacity,
            retention_days = config.retention.retention_days,
            "identity runtime started"
        );

        Self {
            gateway,
            queue,
            workers,
            background: vec![prober, retention],
            pipeline,
            limiters,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline.clone()
    }

    pub fn auth(&self) -> &AuthService {
        self.pipeline.auth()
    }

    /// The `/auth` endpoints, wrapped by this runtime's pipeline.
    pub fn auth_router(&self) -> axum::Router {
        crate::routes::auth_router(self.pipeline())
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    pub fn reader(&self) -> TelemetryReader {
        TelemetryReader::new(Arc::clone(&self.gateway))
    }

    pub fn gateway(&self) -> &Arc<DualStoreGateway> {
        &self.gateway
    }

    pub fn queue(&self) -> &Arc<TelemetryQueue> {
        &self.queue
    }

    pub fn health(&self) -> RuntimeHealth {
        let stores = self.gateway.snapshot();
        RuntimeHealth {
            primary_up: stores.primary_up,
            secondary_up: stores.secondary_up,
            dropped_telemetry: stores.dropped_telemetry,
            queue_overflow: self.queue.overflowed(),
            queued: self.queue.len(),
        }
    }

    /// Stop the prober and retention job, drain queued telemetry, then stop
    /// the writers.
    pub async fn shutdown(self) {
        for handle in &self.background {
            handle.abort();
        }
        for handle in self.background {
            let _ = handle.await;
        }
        self.workers.shutdown().await;
        info!("identity runtime stopped");
    }
}
