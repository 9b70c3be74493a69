//! Bearer token issuing and validation (HS256 JWT).
//!
//! Tokens carry only the subject and an expiry. There is no server-side
//! revocation: a token is good until `exp`, full stop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::AccessPolicy;

/// Lifetime applied when a caller does not ask for one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Longest lifetime the gateway will sign, in minutes (one week).
pub const MAX_TTL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("token lifetime of {0:?} is out of range")]
    TtlOutOfRange(Duration),
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no bearer token presented")]
    Missing,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    MalformedToken,
    #[error("token subject is not a configured user")]
    UnknownSubject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against our own clock in validate_at
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `username`. `None` means [`DEFAULT_TTL`].
    pub fn issue(&self, username: &str, ttl: Option<Duration>) -> Result<String, IssueError> {
        self.issue_at(username, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        username: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<String, IssueError> {
        let ttl = ttl.unwrap_or(DEFAULT_TTL);
        if ttl.as_secs() > MAX_TTL_MINUTES * 60 {
            return Err(IssueError::TtlOutOfRange(ttl));
        }
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| now.timestamp().checked_add(secs))
            .ok_or(IssueError::TtlOutOfRange(ttl))?;

        let claims = Claims {
            sub: username.to_string(),
            iat: now.timestamp(),
            exp,
        };
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Verify signature and expiry; returns the subject.
    pub fn validate(&self, token: &str) -> Result<String, AuthError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::MalformedToken,
            })?;

        if now.timestamp() >= data.claims.exp {
            return Err(AuthError::Expired);
        }
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::MalformedToken);
        }
        Ok(data.claims.sub)
    }

    /// Like [`validate`](Self::validate), but the subject must also appear in
    /// the allow-list.
    pub fn validate_known(&self, token: &str, policy: &AccessPolicy) -> Result<String, AuthError> {
        let username = self.validate(token)?;
        if !policy.contains_user(&username) {
            return Err(AuthError::UnknownSubject);
        }
        Ok(username)
    }
}
