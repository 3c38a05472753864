#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use tower_identity_seaorm::migration::{Migrator, MigratorTrait};
use tower_identity_seaorm::{
    AuthError, AuthService, CoreConfig, DualStoreGateway, Pipeline, Role, SessionStore, Subject,
    SubjectDirectory, TelemetryQueue, TelemetryWorkers, TokenService,
};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-pass";
pub const USER_EMAIL: &str = "user@example.com";
pub const USER_PASSWORD: &str = "user-pass";
pub const DISABLED_EMAIL: &str = "disabled@example.com";
pub const DISABLED_PASSWORD: &str = "disabled-pass";

/// In-memory subject directory keyed by email.
#[derive(Default)]
pub struct TestDirectory {
    subjects: Mutex<HashMap<String, (String, Subject)>>,
}

impl TestDirectory {
    pub fn with_defaults() -> Arc<Self> {
        let directory = Self::default();
        directory.add("admin-1", ADMIN_EMAIL, ADMIN_PASSWORD, Role::Admin, true);
        directory.add("user-1", USER_EMAIL, USER_PASSWORD, Role::User, true);
        directory.add("user-2", DISABLED_EMAIL, DISABLED_PASSWORD, Role::User, false);
        Arc::new(directory)
    }

    pub fn add(&self, id: &str, email: &str, password: &str, role: Role, active: bool) {
        let subject = Subject {
            id: id.to_string(),
            email: email.to_string(),
            role,
            active,
        };
        self.subjects
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), subject));
    }

    pub fn set_active(&self, id: &str, active: bool) {
        for (_, subject) in self.subjects.lock().unwrap().values_mut() {
            if subject.id == id {
                subject.active = active;
            }
        }
    }
}

#[async_trait]
impl SubjectDirectory for TestDirectory {
    async fn find_by_id(&self, subject_id: &str) -> Result<Option<Subject>, AuthError> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .values()
            .find(|(_, subject)| subject.id == subject_id)
            .map(|(_, subject)| subject.clone()))
    }

    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Subject>, AuthError> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .get(email)
            .filter(|(stored, _)| stored == password)
            .map(|(_, subject)| subject.clone()))
    }
}

pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.tokens.access_secret = "test-access-secret".into();
    config.tokens.refresh_secret = "test-refresh-secret".into();
    config.secondary_store_url = "sqlite::memory:".into();
    config
}

/// A migrated, single-connection in-memory SQLite database.
pub async fn connect() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let conn = Database::connect(options).await.unwrap();
    Migrator::up(&conn, None).await.unwrap();
    conn
}

/// Every component wired by hand over one connection, with writers running.
pub struct Harness {
    pub gateway: Arc<DualStoreGateway>,
    pub queue: Arc<TelemetryQueue>,
    pub workers: TelemetryWorkers,
    pub tokens: Arc<TokenService>,
    pub sessions: SessionStore,
    pub directory: Arc<TestDirectory>,
    pub auth: AuthService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::over(connect().await)
    }

    pub fn over(conn: DatabaseConnection) -> Self {
        let config = test_config();
        let gateway = Arc::new(DualStoreGateway::new(conn, Duration::from_secs(3)));
        let queue = Arc::new(TelemetryQueue::new(1024));
        let workers = TelemetryWorkers::spawn(Arc::clone(&queue), Arc::clone(&gateway), 2);
        let tokens = Arc::new(TokenService::new(&config.tokens));
        let sessions = SessionStore::new(
            Arc::clone(&gateway),
            Arc::clone(&queue),
            config.session_ttl,
        );
        let directory = TestDirectory::with_defaults();
        let auth = AuthService::new(
            Arc::clone(&tokens),
            sessions.clone(),
            Arc::clone(&directory) as Arc<dyn SubjectDirectory>,
        );

        Self {
            gateway,
            queue,
            workers,
            tokens,
            sessions,
            directory,
            auth,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::builder(
            self.auth.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.gateway),
        )
        .public_prefix("/public")
        .build()
    }

    /// Wait until the writers have applied everything queued so far.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.queue.flush())
            .await
            .expect("telemetry queue did not drain");
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/125.0")
        .header("x-forwarded-for", "203.0.113.10");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
