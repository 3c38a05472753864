//! Login, refresh, logout and request authentication.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use serde::Serialize;
use tracing::{debug, info};

use crate::entity::user_session::SessionStatus;
use crate::error::AuthError;
use crate::identity::{Authentication, Identity, SubjectDirectory};
use crate::policy::Subject;
use crate::rate_limit::{LimiterName, RateLimiters};
use crate::session::SessionStore;
use crate::token::{TokenPair, TokenService};

/// Input for the login flow.
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    pub ip: String,
    pub user_agent: String,
}

/// Successful login result.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutput {
    pub subject: Subject,
    pub access_token: String,
    pub refresh_token: String,
    /// Session the tokens are bound to (used for logout).
    pub session_id: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Successful refresh result.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutput {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub expires_in: i64,
}

/// Orchestrates tokens, sessions and the subject directory.
#[derive(Clone)]
pub struct AuthService {
    tokens: Arc<TokenService>,
    sessions: SessionStore,
    directory: Arc<dyn SubjectDirectory>,
    limiters: Option<RateLimiters>,
}

impl AuthService {
    pub fn new(
        tokens: Arc<TokenService>,
        sessions: SessionStore,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Self {
        Self {
            tokens,
            sessions,
            directory,
            limiters: None,
        }
    }

    /// Rate limit login attempts with the `auth` limiter, keyed by client IP.
    pub fn with_limiters(mut self, limiters: RateLimiters) -> Self {
        self.limiters = Some(limiters);
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn directory(&self) -> &Arc<dyn SubjectDirectory> {
        &self.directory
    }

    pub fn limiters(&self) -> Option<&RateLimiters> {
        self.limiters.as_ref()
    }

    /// Authenticate with email and password, open a session and issue a
    /// token pair bound to it.
    pub async fn login(&self, input: LoginInput) -> Result<LoginOutput, AuthError> {
        if let Some(limiters) = &self.limiters {
            limiters.check(LimiterName::Auth, &input.ip).await?;
        }

        let subject = self
            .directory
            .verify_credentials(&input.email, &input.password)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !subject.active {
            return Err(AuthError::AccountDisabled);
        }

        let session = self
            .sessions
            .create(&subject.id, &input.ip, &input.user_agent)
            .await;
        let pair = self.tokens.issue(&subject.id, &session.id)?;

        if let Some(limiters) = &self.limiters {
            limiters.reset(LimiterName::Auth, &input.ip).await;
        }
        info!(subject_id = %subject.id, session_id = %session.id, "login succeeded");

        Ok(LoginOutput {
            subject,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            session_id: pair.session_id,
            expires_in: self.tokens.access_ttl().num_seconds(),
        })
    }

    /// Exchange a refresh token for a new pair on the same session.
    ///
    /// The presented refresh token is consumed. A session known to be
    /// terminated or expired refuses the refresh; a session the store cannot
    /// produce (store down, row lost) does not.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutput, AuthError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        if let Some(session) = self.sessions.find(&claims.sid).await {
            match session.status {
                SessionStatus::Terminated => {
                    return Err(AuthError::InvalidToken("session has been terminated".into()))
                }
                SessionStatus::Expired => return Err(AuthError::Expired),
                SessionStatus::Active if session.is_expired() => return Err(AuthError::Expired),
                SessionStatus::Active => {}
            }
        }

        self.active_subject(&claims.sub).await?;

        let pair: TokenPair = self.tokens.rotate(refresh_token)?;
        self.sessions.touch(&pair.session_id);
        debug!(subject_id = %pair.subject_id, session_id = %pair.session_id, "refresh token rotated");

        Ok(RefreshOutput {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            session_id: pair.session_id,
            expires_in: self.tokens.access_ttl().num_seconds(),
        })
    }

    /// Terminate one session. Access tokens already issued for it stay valid
    /// until they expire.
    pub async fn logout(&self, session_id: &str) -> bool {
        self.sessions.terminate(session_id).await
    }

    /// Terminate every session of `subject_id` except `keep_session_id`.
    pub async fn logout_everywhere(&self, subject_id: &str, keep_session_id: Option<&str>) -> u64 {
        self.sessions
            .terminate_all_for_subject(subject_id, keep_session_id)
            .await
    }

    /// Identify the caller from the `Authorization: Bearer` header.
    ///
    /// Without a token the request is anonymous when `allow_anonymous` holds,
    /// otherwise it fails with `NoToken`. When anonymous access is allowed, a
    /// token that is expired or fails verification is ignored as well, so a
    /// client still sending a stale bearer can log in or refresh. Successful
    /// authentication records session activity.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        allow_anonymous: bool,
    ) -> Result<Authentication, AuthError> {
        let token = match bearer_token(headers) {
            Some(token) => token,
            None if allow_anonymous => return Ok(Authentication::Anonymous),
            None => return Err(AuthError::NoToken),
        };

        let claims = match self.tokens.verify_access(token) {
            Ok(claims) => claims,
            Err(err) if allow_anonymous => {
                debug!(error = %err, "ignoring unusable token on public route");
                return Ok(Authentication::Anonymous);
            }
            Err(err) => return Err(err.into()),
        };
        let subject = self.active_subject(&claims.sub).await?;
        self.sessions.touch(&claims.sid);

        Ok(Authentication::Subject(Identity {
            subject,
            session_id: claims.sid,
        }))
    }

    async fn active_subject(&self, subject_id: &str) -> Result<Subject, AuthError> {
        let subject = self
            .directory
            .find_by_id(subject_id)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("unknown subject".into()))?;
        if !subject.active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(subject)
    }
}

/// The token of an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
