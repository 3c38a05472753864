//! Signed access and refresh tokens.
//!
//! Both token kinds are HS256 JWTs signed with different secrets and tagged
//! with a `typ` claim, so neither can stand in for the other. Refresh tokens
//! are single-use: [`TokenService::rotate`] records the consumed token id and
//! every later verification of it fails.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::TokenError;

/// Consumed refresh ids are pruned once the ledger grows past this size.
const LEDGER_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id.
    pub sub: String,
    /// Session the token pair was minted for.
    pub sid: String,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub subject_id: String,
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues, verifies and rotates token pairs.
///
/// Verification is stateless apart from the in-memory ledger of consumed
/// refresh token ids.
pub struct TokenService {
    access: SigningKey,
    refresh: SigningKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    issuer: String,
    consumed: Mutex<HashMap<String, i64>>,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            access: SigningKey::from_secret(&config.access_secret),
            refresh: SigningKey::from_secret(&config.refresh_secret),
            access_ttl: Duration::from_std(config.access_ttl).unwrap_or(Duration::hours(24)),
            refresh_ttl: Duration::from_std(config.refresh_ttl).unwrap_or(Duration::days(7)),
            issuer: config.issuer.clone(),
            consumed: Mutex::new(HashMap::new()),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Mint a new pair for `subject_id`, bound to `session_id`.
    pub fn issue(&self, subject_id: &str, session_id: &str) -> Result<TokenPair, TokenError> {
        self.issue_at(subject_id, session_id, Utc::now())
    }

    /// Mint a pair as if issued at `issued_at`.
    pub fn issue_at(
        &self,
        subject_id: &str,
        session_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let access_expires_at = issued_at + self.access_ttl;
        let refresh_expires_at = issued_at + self.refresh_ttl;

        let access_token = self.sign(
            TokenKind::Access,
            subject_id,
            session_id,
            issued_at,
            access_expires_at,
        )?;
        let refresh_token = self.sign(
            TokenKind::Refresh,
            subject_id,
            session_id,
            issued_at,
            refresh_expires_at,
        )?;

        Ok(TokenPair {
            subject_id: subject_id.to_string(),
            session_id: session_id.to_string(),
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode(token, TokenKind::Access)
    }

    /// Verify a refresh token, rejecting ones already consumed by rotation.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode(token, TokenKind::Refresh)?;
        if self.is_consumed(&claims.jti) {
            return Err(TokenError::Invalid("refresh token already used".into()));
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair on the same session.
    ///
    /// The presented token is consumed; concurrent rotations of the same token
    /// let exactly one through.
    pub fn rotate(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.verify_refresh(refresh_token)?;
        if !self.consume(&claims.jti, claims.exp) {
            return Err(TokenError::Invalid("refresh token already used".into()));
        }
        self.issue(&claims.sub, &claims.sid)
    }

    fn sign(
        &self,
        typ: TokenKind,
        subject_id: &str,
        session_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject_id.to_string(),
            sid: session_id.to_string(),
            typ,
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let key = match typ {
            TokenKind::Access => &self.access.encoding,
            TokenKind::Refresh => &self.refresh.encoding,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let key = match expected {
            TokenKind::Access => &self.access.decoding,
            TokenKind::Refresh => &self.refresh.decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);

        let claims = jsonwebtoken::decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => TokenError::Malformed(e.to_string()),
                _ => TokenError::Invalid(e.to_string()),
            })?;

        if claims.typ != expected {
            return Err(TokenError::Invalid("unexpected token type".into()));
        }
        Ok(claims)
    }

    fn is_consumed(&self, jti: &str) -> bool {
        self.consumed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(jti)
    }

    /// Returns `false` if `jti` was already consumed.
    fn consume(&self, jti: &str, exp: i64) -> bool {
        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if consumed.len() > LEDGER_PRUNE_THRESHOLD {
            // expired ids fail verification on their own
            let now = Utc::now().timestamp();
            consumed.retain(|_, exp| *exp >= now);
        }
        consumed.insert(jti.to_string(), exp).is_none()
    }
}
