//! The authenticated identity attached to a request.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use serde::Serialize;

use crate::error::AuthError;
use crate::policy::Subject;

/// Source of subjects, owned by the surrounding application.
///
/// The core never stores credentials; it asks the directory.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Look up a subject by id. `Ok(None)` if it does not exist.
    async fn find_by_id(&self, subject_id: &str) -> Result<Option<Subject>, AuthError>;

    /// Check a credential pair. `Ok(None)` if it does not match any subject.
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Subject>, AuthError>;
}

/// The subject behind a request and the session its token is bound to.
///
/// Inserted into the request extensions by the pipeline. As an extractor,
/// `Identity` rejects anonymous requests with `NO_TOKEN`; use
/// `Option<Identity>` where anonymous access is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: Subject,
    pub session_id: String,
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(AuthError::NoToken)
    }
}

impl<S> OptionalFromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned())
    }
}

/// Result of identifying a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Subject(Identity),
    Anonymous,
}

impl Authentication {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Authentication::Subject(identity) => Some(identity),
            Authentication::Anonymous => None,
        }
    }

    pub fn into_identity(self) -> Option<Identity> {
        match self {
            Authentication::Subject(identity) => Some(identity),
            Authentication::Anonymous => None,
        }
    }
}
