//! HTTP endpoints for login, refresh and logout.

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::identity::Identity;
use crate::pipeline::{AuditActor, AuditRoutes, AuditTag, ClientInfo, Pipeline};
use crate::service::{LoginInput, LoginOutput, RefreshOutput};
use crate::session::Session;

/// Paths that accept requests without an access token.
pub const PUBLIC_AUTH_PATHS: &[&str] = &["/auth/login", "/auth/refresh"];

pub(crate) fn tag_auth_routes(routes: AuditRoutes) -> AuditRoutes {
    routes
        .tag(
            Method::POST,
            "/auth/login",
            AuditTag::new("login", "auth").with_metric("user_login"),
        )
        .tag(Method::POST, "/auth/refresh", AuditTag::new("refresh", "auth"))
        .tag(
            Method::POST,
            "/auth/logout",
            AuditTag::new("logout", "auth").with_metric("user_logout"),
        )
        .tag(
            Method::POST,
            "/auth/logout-all",
            AuditTag::new("logout_all", "auth"),
        )
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutAllRequest {
    /// Keep the session making the request (`?keep_current=true`).
    #[serde(default)]
    pub keep_current: bool,
}

#[derive(Debug, Serialize)]
pub struct TerminatedResponse {
    pub terminated: u64,
}

/// The `/auth` routes, already wrapped by `pipeline`.
pub fn auth_router(pipeline: Pipeline) -> Router {
    let router = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/sessions", get(sessions))
        .with_state(pipeline.clone());
    pipeline.wrap(router)
}

async fn login(
    State(pipeline): State<Pipeline>,
    Extension(client): Extension<ClientInfo>,
    Json(body): Json<LoginRequest>,
) -> Result<(Extension<AuditActor>, Json<LoginOutput>), AuthError> {
    let output = pipeline
        .auth()
        .login(LoginInput {
            email: body.email,
            password: body.password,
            ip: client.ip,
            user_agent: client.user_agent,
        })
        .await?;

    let actor = AuditActor {
        id: output.subject.id.clone(),
        email: Some(output.subject.email.clone()),
        session_id: Some(output.session_id.clone()),
    };
    Ok((Extension(actor), Json(output)))
}

async fn refresh(
    State(pipeline): State<Pipeline>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshOutput>, AuthError> {
    let output = pipeline.auth().refresh(&body.refresh_token).await?;
    Ok(Json(output))
}

async fn logout(State(pipeline): State<Pipeline>, identity: Identity) -> StatusCode {
    pipeline.auth().logout(&identity.session_id).await;
    StatusCode::NO_CONTENT
}

async fn logout_all(
    State(pipeline): State<Pipeline>,
    identity: Identity,
    Query(params): Query<LogoutAllRequest>,
) -> Json<TerminatedResponse> {
    let keep = params.keep_current.then_some(identity.session_id.as_str());
    let terminated = pipeline
        .auth()
        .logout_everywhere(&identity.subject.id, keep)
        .await;
    Json(TerminatedResponse { terminated })
}

async fn sessions(State(pipeline): State<Pipeline>, identity: Identity) -> Json<Vec<Session>> {
    Json(
        pipeline
            .auth()
            .sessions()
            .active_for_subject(&identity.subject.id)
            .await,
    )
}
