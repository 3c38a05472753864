//! Per-request identification and observation.
//!
//! [`Pipeline::wrap`] installs [`observe`] around a router. Each request moves
//! through [`Stage::Received`] (timer starts), [`Stage::Identified`] (bearer
//! token verified, [`Identity`] attached or the request rejected),
//! [`Stage::Handled`] (the wrapped handler runs), [`Stage::Observed`]
//! (audit, analytics and performance events handed to the sinks) and
//! [`Stage::Responded`]. Telemetry is only ever enqueued, so the response
//! never waits on the secondary store.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{header, HeaderMap, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::trace;

use crate::dispatch::TelemetryQueue;
use crate::error::AuthError;
use crate::health::DualStoreGateway;
use crate::identity::Identity;
use crate::rate_limit::{LimiterName, RateLimiters};
use crate::service::AuthService;
use crate::sink::{AnalyticsSink, AuditSink, PerformanceSink, TelemetrySink};
use crate::telemetry::{AnalyticsMetric, AuditEntry, PerformanceSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Identified,
    Handled,
    Observed,
    Responded,
}

/// Error detail a handler attaches to a failed response; recorded as the
/// audit entry's `error_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail(pub String);

/// Actor a handler attributes the request to when the request itself was
/// anonymous (e.g. login).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditActor {
    pub id: String,
    pub email: Option<String>,
    pub session_id: Option<String>,
}

/// Replaces the default audit `details` blob.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDetails(pub Value);

/// Client address and user agent, inserted into the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    /// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let ip = forwarded
            .or(real_ip)
            .map(str::to_string)
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self { ip, user_agent }
    }
}

/// How an audited route is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTag {
    pub action: String,
    pub resource_type: String,
    /// Analytics metric incremented when the action succeeds.
    pub metric: Option<String>,
}

impl AuditTag {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            metric: None,
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }
}

/// Which routes produce audit entries.
///
/// Explicit `(method, route pattern)` entries win. Otherwise, unless turned
/// off, every mutating request is tagged: `POST` as `create`, `PUT`/`PATCH`
/// as `update`, `DELETE` as `delete`, with the resource type taken from the
/// first path segment that is not `api`.
#[derive(Debug, Clone)]
pub struct AuditRoutes {
    explicit: HashMap<(Method, String), Option<AuditTag>>,
    tag_mutations: bool,
}

impl Default for AuditRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditRoutes {
    /// Default tagging plus the built-in `/auth` routes.
    pub fn new() -> Self {
        let routes = Self {
            explicit: HashMap::new(),
            tag_mutations: true,
        };
        crate::routes::tag_auth_routes(routes)
    }

    pub fn tag(mut self, method: Method, pattern: &str, tag: AuditTag) -> Self {
        self.explicit.insert((method, pattern.to_string()), Some(tag));
        self
    }

    /// Never audit this route, even if it mutates.
    pub fn ignore(mut self, method: Method, pattern: &str) -> Self {
        self.explicit.insert((method, pattern.to_string()), None);
        self
    }

    /// Only audit explicitly tagged routes.
    pub fn explicit_only(mut self) -> Self {
        self.tag_mutations = false;
        self
    }

    pub fn resolve(&self, method: &Method, pattern: &str) -> Option<AuditTag> {
        if let Some(tag) = self.explicit.get(&(method.clone(), pattern.to_string())) {
            return tag.clone();
        }
        if !self.tag_mutations {
            return None;
        }

        let action = match *method {
            Method::POST => "create",
            Method::PUT | Method::PATCH => "update",
            Method::DELETE => "delete",
            _ => return None,
        };
        let resource = pattern
            .split('/')
            .find(|segment| !segment.is_empty() && *segment != "api" && !segment.starts_with('{'))
            .unwrap_or("root");
        Some(AuditTag::new(action, resource).with_metric(format!("{resource}_{action}")))
    }
}

/// The concrete path segment bound to the last `{param}` of `pattern`.
pub fn resource_id(pattern: &str, path: &str) -> Option<String> {
    let patterns: Vec<&str> = pattern.split('/').collect();
    let segments: Vec<&str> = path.split('/').collect();
    let index = patterns
        .iter()
        .rposition(|segment| segment.starts_with('{') && segment.ends_with('}'))?;
    segments
        .get(index)
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}

/// Whether `path` is `prefix` itself or lies below it, on a segment boundary.
fn within_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

struct PipelineInner {
    auth: AuthService,
    audit: AuditSink,
    analytics: AnalyticsSink,
    performance: PerformanceSink,
    routes: AuditRoutes,
    public_prefixes: Vec<String>,
    limiters: Option<RateLimiters>,
}

/// Shared state of the request pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    auth: AuthService,
    queue: Arc<TelemetryQueue>,
    gateway: Arc<DualStoreGateway>,
    routes: AuditRoutes,
    public_prefixes: Vec<String>,
    limiters: Option<RateLimiters>,
}

impl PipelineBuilder {
    pub fn audit_routes(mut self, routes: AuditRoutes) -> Self {
        self.routes = routes;
        self
    }

    /// Requests whose path starts with `prefix` may be anonymous.
    pub fn public_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_prefixes.push(prefix.into());
        self
    }

    /// Apply the `global` limiter to every request, keyed by client IP.
    pub fn global_limit(mut self, limiters: RateLimiters) -> Self {
        self.limiters = Some(limiters);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            inner: Arc::new(PipelineInner {
                auth: self.auth,
                audit: AuditSink::new(Arc::clone(&self.queue), Arc::clone(&self.gateway)),
                analytics: AnalyticsSink::new(Arc::clone(&self.queue), Arc::clone(&self.gateway)),
                performance: PerformanceSink::new(self.queue, self.gateway),
                routes: self.routes,
                public_prefixes: self.public_prefixes,
                limiters: self.limiters,
            }),
        }
    }
}

impl Pipeline {
    /// Start building a pipeline. The `/auth/login` and `/auth/refresh`
    /// routes are public by default.
    pub fn builder(
        auth: AuthService,
        queue: Arc<TelemetryQueue>,
        gateway: Arc<DualStoreGateway>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            auth,
            queue,
            gateway,
            routes: AuditRoutes::new(),
            public_prefixes: crate::routes::PUBLIC_AUTH_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            limiters: None,
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    pub fn audit_sink(&self) -> &AuditSink {
        &self.inner.audit
    }

    pub fn analytics_sink(&self) -> &AnalyticsSink {
        &self.inner.analytics
    }

    pub fn performance_sink(&self) -> &PerformanceSink {
        &self.inner.performance
    }

    /// Run every route of `router` through [`observe`].
    pub fn wrap<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self.clone(), observe))
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.inner
            .public_prefixes
            .iter()
            .any(|prefix| within_prefix(path, prefix))
    }

    async fn identify(
        &self,
        headers: &HeaderMap,
        client: &ClientInfo,
        path: &str,
    ) -> Result<Option<Identity>, AuthError> {
        if let Some(limiters) = &self.inner.limiters {
            limiters.check(LimiterName::Global, &client.ip).await?;
        }
        let authentication = self
            .inner
            .auth
            .authenticate(headers, self.is_public(path))
            .await?;
        Ok(authentication.into_identity())
    }

    fn record(&self, observed: Observed<'_>, response: &Response) {
        let status = response.status();
        let elapsed_ms = observed.started.elapsed().as_secs_f64() * 1000.0;
        let actor = response.extensions().get::<AuditActor>();
        let actor_id = observed
            .identity
            .map(|identity| identity.subject.id.clone())
            .or_else(|| actor.map(|a| a.id.clone()));

        if let Some(tag) = observed.tag {
            let resource_id = resource_id(observed.route, observed.path);
            let details = response
                .extensions()
                .get::<AuditDetails>()
                .map(|d| d.0.clone())
                .unwrap_or_else(|| {
                    json!({
                        "method": observed.method.as_str(),
                        "path": observed.path,
                        "status": status.as_u16(),
                    })
                });

            let mut entry = AuditEntry::new(tag.action.clone(), tag.resource_type.clone())
                .with_client(observed.client.ip.clone(), observed.client.user_agent.clone())
                .with_details(details);
            if let Some(identity) = observed.identity {
                entry = entry
                    .with_actor(identity.subject.id.clone(), Some(identity.subject.email.clone()))
                    .with_session(identity.session_id.clone());
            } else if let Some(actor) = actor {
                entry = entry.with_actor(actor.id.clone(), actor.email.clone());
                if let Some(session_id) = &actor.session_id {
                    entry = entry.with_session(session_id.clone());
                }
            }
            if let Some(id) = &resource_id {
                entry = entry.with_resource_id(id.clone());
            }

            let succeeded = status.as_u16() < 400;
            if !succeeded {
                let message = response
                    .extensions()
                    .get::<FailureDetail>()
                    .map(|d| d.0.clone())
                    .unwrap_or_else(|| {
                        status
                            .canonical_reason()
                            .unwrap_or("request failed")
                            .to_string()
                    });
                entry = entry.failed(message);
            }
            self.inner.audit.record(entry);

            if let (true, Some(metric_type)) = (succeeded, &tag.metric) {
                let mut metric = AnalyticsMetric::increment(metric_type.clone());
                if let Some(id) = &actor_id {
                    metric = metric.with_actor(id.clone());
                }
                if let Some(id) = resource_id {
                    metric = metric.with_resource_id(id);
                }
                self.inner.analytics.record(metric);
            }
        }

        self.inner.performance.record(PerformanceSample {
            endpoint: observed.route.to_string(),
            method: observed.method.to_string(),
            status_code: status.as_u16(),
            response_time_ms: elapsed_ms,
            cpu_gauge: None,
            mem_gauge: None,
            actor_id,
            ip: observed.client.ip.clone(),
            timestamp: Utc::now(),
        });
    }
}

struct Observed<'a> {
    started: Instant,
    method: &'a Method,
    route: &'a str,
    path: &'a str,
    client: &'a ClientInfo,
    identity: Option<&'a Identity>,
    tag: Option<AuditTag>,
}

/// Middleware driving a request through the pipeline stages.
pub async fn observe(State(pipeline): State<Pipeline>, mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = ClientInfo::from_parts(request.headers(), peer);
    trace!(stage = ?Stage::Received, %method, %route, "request received");

    let headers = request.headers().clone();
    let (identity, response) = match pipeline.identify(&headers, &client, &path).await {
        Ok(identity) => {
            trace!(stage = ?Stage::Identified, authenticated = identity.is_some(), "request identified");
            if let Some(identity) = &identity {
                request.extensions_mut().insert(identity.clone());
            }
            request.extensions_mut().insert(client.clone());
            let response = next.run(request).await;
            trace!(stage = ?Stage::Handled, status = %response.status(), "request handled");
            (identity, response)
        }
        Err(err) => {
            trace!(stage = ?Stage::Identified, kind = err.kind(), "request rejected");
            (None, err.into_response())
        }
    };

    let tag = pipeline.inner.routes.resolve(&method, &route);
    pipeline.record(
        Observed {
            started,
            method: &method,
            route: &route,
            path: &path,
            client: &client,
            identity: identity.as_ref(),
            tag,
        },
        &response,
    );
    trace!(stage = ?Stage::Observed, "telemetry dispatched");
    trace!(stage = ?Stage::Responded, elapsed_ms = started.elapsed().as_millis() as u64, "responding");
    response
}
