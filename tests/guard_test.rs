mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get};
use axum::Router;
use tower::ServiceExt;
use tower_identity_seaorm::{
    enforce_limit, require_ownership, AuthError, LimitGuard, LimitRule, LimiterName, LoginInput,
    OwnershipGuard, PolicyTable, RateLimiters, ResourceLookup, Role,
};

use common::{json_body, Harness, ADMIN_EMAIL, ADMIN_PASSWORD, USER_EMAIL, USER_PASSWORD};

struct Files(HashMap<String, String>);

#[async_trait]
impl ResourceLookup for Files {
    async fn owner_of(&self, kind: &str, id: &str) -> Result<Option<String>, AuthError> {
        assert_eq!(kind, "file");
        Ok(self.0.get(id).cloned())
    }
}

fn files() -> Arc<Files> {
    Arc::new(Files(HashMap::from([
        ("7".to_string(), "user-1".to_string()),
        ("8".to_string(), "admin-1".to_string()),
    ])))
}

async fn token(harness: &Harness, email: &str, password: &str) -> String {
    harness
        .auth
        .login(LoginInput {
            email: email.to_string(),
            password: password.to_string(),
            ip: "198.51.100.7".to_string(),
            user_agent: String::new(),
        })
        .await
        .unwrap()
        .access_token
}

fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn ownership_guard_admits_owners_and_admins() {
    let harness = Harness::new().await;
    let app = harness.pipeline().wrap(
        Router::new()
            .route("/api/files/{id}", delete(|| async { StatusCode::NO_CONTENT }))
            .route_layer(from_fn_with_state(
                OwnershipGuard::new("file", files()),
                require_ownership,
            )),
    );
    let user = token(&harness, USER_EMAIL, USER_PASSWORD).await;
    let admin = token(&harness, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let own = app
        .clone()
        .oneshot(request("DELETE", "/api/files/7", Some(&user)))
        .await
        .unwrap();
    assert_eq!(own.status(), StatusCode::NO_CONTENT);

    let foreign = app
        .clone()
        .oneshot(request("DELETE", "/api/files/8", Some(&user)))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        json_body(foreign).await["error"]["kind"],
        "INSUFFICIENT_PERMISSIONS"
    );

    let missing = app
        .clone()
        .oneshot(request("DELETE", "/api/files/99", Some(&user)))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let bypass = app
        .clone()
        .oneshot(request("DELETE", "/api/files/7", Some(&admin)))
        .await
        .unwrap();
    assert_eq!(bypass.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn ownership_guard_decides_through_the_policy_table() {
    let harness = Harness::new().await;
    harness
        .directory
        .add("staff-1", "staff@example.com", "staff-pass", Role::Supervisor, true);
    let guard = OwnershipGuard::new("file", files())
        .with_policy(Arc::new(PolicyTable::platform_default()));
    let app = harness.pipeline().wrap(
        Router::new()
            .route(
                "/api/files/{id}",
                delete(|| async { StatusCode::NO_CONTENT })
                    .patch(|| async { StatusCode::NO_CONTENT }),
            )
            .route_layer(from_fn_with_state(guard, require_ownership)),
    );
    let user = token(&harness, USER_EMAIL, USER_PASSWORD).await;
    let staff = token(&harness, "staff@example.com", "staff-pass").await;

    // staff may delete any file but only edit their own
    let removed = app
        .clone()
        .oneshot(request("DELETE", "/api/files/7", Some(&staff)))
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    let edited = app
        .clone()
        .oneshot(request("PATCH", "/api/files/7", Some(&staff)))
        .await
        .unwrap();
    assert_eq!(edited.status(), StatusCode::FORBIDDEN);

    let own_edit = app
        .clone()
        .oneshot(request("PATCH", "/api/files/7", Some(&user)))
        .await
        .unwrap();
    assert_eq!(own_edit.status(), StatusCode::NO_CONTENT);

    let foreign_delete = app
        .clone()
        .oneshot(request("DELETE", "/api/files/8", Some(&user)))
        .await
        .unwrap();
    assert_eq!(foreign_delete.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        json_body(foreign_delete).await["error"]["kind"],
        "INSUFFICIENT_PERMISSIONS"
    );
}

#[tokio::test]
async fn limit_guard_keys_by_subject_then_ip() {
    let harness = Harness::new().await;
    let limiters = RateLimiters::in_memory(HashMap::from([(
        LimiterName::Search,
        LimitRule {
            max_attempts: 1,
            window: Duration::from_secs(60),
        },
    )]));
    let app = harness.pipeline().wrap(
        Router::new()
            .route("/public/search", get(|| async { "results" }))
            .route_layer(from_fn_with_state(
                LimitGuard::new(limiters, LimiterName::Search),
                enforce_limit,
            )),
    );
    let user = token(&harness, USER_EMAIL, USER_PASSWORD).await;
    let admin = token(&harness, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let first = app
        .clone()
        .oneshot(request("GET", "/public/search", Some(&user)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(request("GET", "/public/search", Some(&user)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));

    // separate budgets per subject and for anonymous callers
    let other = app
        .clone()
        .oneshot(request("GET", "/public/search", Some(&admin)))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    let anonymous = app
        .clone()
        .oneshot(request("GET", "/public/search", None))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::OK);
}
