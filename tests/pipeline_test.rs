mod common;

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::Path;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::json;
use tower::ServiceExt;
use tower_identity_seaorm::entity::{analytics, audit_log, performance_metric};
use tower_identity_seaorm::{
    AuditEntry, AuditFilter, AuditSink, FailureDetail, Identity, TelemetryReader, TelemetrySink,
};

use common::{json_body, json_request, Harness, ADMIN_EMAIL, ADMIN_PASSWORD, USER_EMAIL, USER_PASSWORD};

fn api(harness: &Harness) -> Router {
    let api = Router::new()
        .route(
            "/api/projects",
            post(|identity: Identity| async move {
                (
                    StatusCode::CREATED,
                    Json(json!({ "owner": identity.subject.id })),
                )
            }),
        )
        .route(
            "/api/projects/{id}",
            delete(|Path(id): Path<String>| async move {
                (
                    StatusCode::NOT_FOUND,
                    Extension(FailureDetail(format!("project {id} does not exist"))),
                )
                    .into_response()
            }),
        )
        .route("/public/ping", get(|| async { "pong" }));

    let pipeline = harness.pipeline();
    pipeline
        .wrap(api)
        .merge(tower_identity_seaorm::auth_router(pipeline))
}

async fn login(app: &Router, email: &str, password: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": email, "password": password }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["session_id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn missing_token_is_rejected_and_audited() {
    let harness = Harness::new().await;
    let app = api(&harness);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/projects", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "NO_TOKEN");

    harness.settle().await;
    let conn = harness.gateway.connection();
    let entries = audit_log::Entity::find().all(conn).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "create");
    assert_eq!(entries[0].resource, "projects");
    assert!(!entries[0].success);
    assert!(entries[0].error_message.as_deref().unwrap().contains("NO_TOKEN"));
    assert_eq!(entries[0].ip_address, "203.0.113.10");
    assert_eq!(entries[0].user_id, None);

    let samples = performance_metric::Entity::find().all(conn).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].status_code, 401);
    assert_eq!(samples[0].endpoint, "/api/projects");
    assert!(analytics::Entity::find().all(conn).await.unwrap().is_empty());
}

#[tokio::test]
async fn authenticated_mutation_is_audited_counted_and_timed() {
    let harness = Harness::new().await;
    let app = api(&harness);
    let (token, session_id) = login(&app, USER_EMAIL, USER_PASSWORD).await;

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/projects", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["owner"], "user-1");

    harness.settle().await;
    let reader = TelemetryReader::new(harness.gateway.clone());
    let created = reader
        .audit_trail(AuditFilter {
            action: Some("create".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert!(created[0].success);
    assert_eq!(created[0].actor_id.as_deref(), Some("user-1"));
    assert_eq!(created[0].actor_email.as_deref(), Some(USER_EMAIL));
    assert_eq!(created[0].session_id.as_deref(), Some(session_id.as_str()));

    let today = Utc::now().date_naive();
    let totals = reader.metric_totals(today, today).await.unwrap();
    let projects = totals
        .iter()
        .find(|t| t.metric_type == "projects_create")
        .unwrap();
    assert_eq!(projects.total, 1);

    let latency = reader
        .endpoint_latency(Utc::now() - chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(latency
        .iter()
        .any(|l| l.endpoint == "/api/projects" && l.method == "POST" && l.samples == 1));
}

#[tokio::test]
async fn login_is_attributed_to_the_subject() {
    let harness = Harness::new().await;
    let app = api(&harness);
    let (_, session_id) = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let failed = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": ADMIN_EMAIL, "password": "wrong" }),
        ))
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::UNAUTHORIZED);

    harness.settle().await;
    let reader = TelemetryReader::new(harness.gateway.clone());
    let logins = reader
        .audit_trail(AuditFilter {
            action: Some("login".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logins.len(), 2);

    let succeeded = logins.iter().find(|e| e.success).unwrap();
    assert_eq!(succeeded.actor_id.as_deref(), Some("admin-1"));
    assert_eq!(succeeded.session_id.as_deref(), Some(session_id.as_str()));

    let refused = logins.iter().find(|e| !e.success).unwrap();
    assert_eq!(refused.actor_id, None);
    assert!(refused
        .error_message
        .as_deref()
        .unwrap()
        .contains("INVALID_CREDENTIALS"));

    let today = Utc::now().date_naive();
    let totals = reader.metric_totals(today, today).await.unwrap();
    assert_eq!(
        totals.iter().find(|t| t.metric_type == "user_login").unwrap().total,
        1
    );
}

#[tokio::test]
async fn handler_failures_are_audited_with_their_detail() {
    let harness = Harness::new().await;
    let app = api(&harness);
    let (token, _) = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let response = app
        .clone()
        .oneshot(json_request("DELETE", "/api/projects/42", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.settle().await;
    let entries = TelemetryReader::new(harness.gateway.clone())
        .audit_trail(AuditFilter {
            action: Some("delete".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].resource_id.as_deref(), Some("42"));
    assert_eq!(
        entries[0].error_message.as_deref(),
        Some("project 42 does not exist")
    );
}

#[tokio::test]
async fn public_routes_allow_anonymous_and_ignore_unusable_tokens() {
    let harness = Harness::new().await;
    let app = api(&harness);

    let ping = |token: Option<&str>| {
        let mut builder = Request::builder().uri("/public/ping");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(ping(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(ping(Some("not-a-jwt"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // protected routes still verify what they are given
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/projects", Some("not-a-jwt"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["kind"], "INVALID_TOKEN");

    harness.settle().await;
    let conn = harness.gateway.connection();
    let entries = audit_log::Entity::find().all(conn).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "create");
    assert!(!entries[0].success);
    assert_eq!(
        performance_metric::Entity::find().all(conn).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn refresh_succeeds_while_the_stale_bearer_is_still_sent() {
    let harness = Harness::new().await;
    let app = api(&harness);
    let (_, session_id) = login(&app, USER_EMAIL, USER_PASSWORD).await;

    let stale = harness
        .tokens
        .issue_at("user-1", &session_id, Utc::now() - chrono::Duration::hours(25))
        .unwrap();
    assert!(harness.tokens.verify_access(&stale.access_token).is_err());

    let refresh = |token: &str| {
        json_request(
            "POST",
            "/auth/refresh",
            Some(&stale.access_token),
            json!({ "refresh_token": token }),
        )
    };

    let response = app
        .clone()
        .oneshot(refresh(&stale.refresh_token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["session_id"], session_id.as_str());
    let fresh = body["access_token"].as_str().unwrap();
    assert_eq!(harness.tokens.verify_access(fresh).unwrap().sub, "user-1");

    let replay = app
        .clone()
        .oneshot(refresh(&stale.refresh_token))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(replay).await["error"]["kind"], "INVALID_TOKEN");
}

#[tokio::test]
async fn sessions_endpoint_lists_and_logout_closes() {
    let harness = Harness::new().await;
    let app = api(&harness);
    let (token, session_id) = login(&app, USER_EMAIL, USER_PASSWORD).await;
    login(&app, USER_EMAIL, USER_PASSWORD).await;

    let listed = app
        .clone()
        .oneshot(json_request("GET", "/auth/sessions", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    assert_eq!(json_body(listed).await.as_array().unwrap().len(), 2);

    let logout = app
        .clone()
        .oneshot(json_request("POST", "/auth/logout", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let session = harness.sessions.find(&session_id).await.unwrap();
    assert!(session.logout_at.is_some());
    assert_eq!(harness.sessions.active_for_subject("user-1").await.len(), 1);
}

#[tokio::test]
async fn unreachable_store_does_not_slow_or_fail_requests() {
    let harness = Harness::over(DatabaseConnection::Disconnected);
    harness.gateway.secondary().mark_down("test");
    let app = api(&harness);

    let (token, _) = login(&app, USER_EMAIL, USER_PASSWORD).await;
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/projects", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(harness.gateway.snapshot().dropped_telemetry > 0);

    let sink = AuditSink::new(harness.queue.clone(), harness.gateway.clone());
    let started = Instant::now();
    sink.record(AuditEntry::new("update", "file"));
    assert!(started.elapsed() < Duration::from_millis(5));
    assert!(harness.queue.is_empty());
}
