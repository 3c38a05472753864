//! Route guards, applied with `axum::middleware::from_fn_with_state`.
//!
//! Guards run inside the [`Pipeline`](crate::Pipeline), so they see the
//! [`Identity`] it attached. Apply them with `route_layer` so the matched
//! route is known.
//!
//! ```ignore
//! let admin = Router::new()
//!     .route("/api/settings", put(update_settings))
//!     .route_layer(from_fn_with_state(RoleGuard::new(&[Role::Admin]), require_role));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{MatchedPath, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AuthError;
use crate::identity::Identity;
use crate::pipeline::{resource_id, ClientInfo};
use crate::policy::{ensure_role, owner_or_admin, Action, PolicyTable, ResourceRef, Role};
use crate::rate_limit::{LimiterName, RateLimiters};

fn identity(request: &Request) -> Result<&Identity, AuthError> {
    request
        .extensions()
        .get::<Identity>()
        .ok_or(AuthError::NoToken)
}

#[derive(Debug, Clone)]
pub struct RoleGuard {
    roles: Arc<[Role]>,
}

impl RoleGuard {
    pub fn new(roles: &[Role]) -> Self {
        Self {
            roles: Arc::from(roles),
        }
    }
}

/// Admit only subjects holding one of the guard's roles.
pub async fn require_role(
    State(guard): State<RoleGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    ensure_role(&identity(&request)?.subject, &guard.roles)?;
    Ok(next.run(request).await)
}

/// Resolves who owns a resource, supplied by the application.
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// Owner subject id of `kind`/`id`, or `None` if it does not exist.
    async fn owner_of(&self, kind: &str, id: &str) -> Result<Option<String>, AuthError>;
}

#[derive(Clone)]
pub struct OwnershipGuard {
    kind: String,
    lookup: Arc<dyn ResourceLookup>,
    policy: Arc<PolicyTable>,
}

impl OwnershipGuard {
    /// Owner-or-admin for every action on `kind`.
    pub fn new(kind: impl Into<String>, lookup: Arc<dyn ResourceLookup>) -> Self {
        let kind = kind.into();
        let policy = [
            Action::Read,
            Action::Create,
            Action::Update,
            Action::Delete,
            Action::Manage,
        ]
        .into_iter()
        .fold(PolicyTable::new(), |table, action| {
            table.allow(action, &kind, owner_or_admin)
        });
        Self {
            kind,
            lookup,
            policy: Arc::new(policy),
        }
    }

    /// Decide with `policy` instead of owner-or-admin.
    pub fn with_policy(mut self, policy: Arc<PolicyTable>) -> Self {
        self.policy = policy;
        self
    }
}

fn action_for(method: &Method) -> Action {
    match *method {
        Method::GET | Method::HEAD => Action::Read,
        Method::POST => Action::Create,
        Method::PUT | Method::PATCH => Action::Update,
        Method::DELETE => Action::Delete,
        _ => Action::Manage,
    }
}

/// Authorize the request method against the resource named by the route's
/// last path parameter, through the guard's [`PolicyTable`]. A resource that
/// cannot be found has no owner.
pub async fn require_ownership(
    State(guard): State<OwnershipGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let subject = identity(&request)?.subject.clone();
    let id = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|matched| resource_id(matched.as_str(), request.uri().path()));
    let owner = match id {
        Some(id) => guard.lookup.owner_of(&guard.kind, &id).await?,
        None => None,
    };
    let resource = match owner {
        Some(owner) => ResourceRef::owned_by(guard.kind.as_str(), owner),
        None => ResourceRef::kind(guard.kind.as_str()),
    };
    guard
        .policy
        .authorize(&subject, action_for(request.method()), &resource)?;
    Ok(next.run(request).await)
}

#[derive(Clone)]
pub struct LimitGuard {
    limiters: RateLimiters,
    name: LimiterName,
}

impl LimitGuard {
    pub fn new(limiters: RateLimiters, name: LimiterName) -> Self {
        Self { limiters, name }
    }
}

/// Count the request against the guard's limiter, keyed by subject id when
/// authenticated and by client IP otherwise.
pub async fn enforce_limit(
    State(guard): State<LimitGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let key = match request.extensions().get::<Identity>() {
        Some(identity) => format!("subject:{}", identity.subject.id),
        None => {
            let ip = request
                .extensions()
                .get::<ClientInfo>()
                .map(|client| client.ip.clone())
                .unwrap_or_else(|| "unknown".to_string());
            format!("ip:{ip}")
        }
    };
    guard.limiters.check(guard.name, &key).await?;
    Ok(next.run(request).await)
}
