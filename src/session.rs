//! Session Credentials
//!
//! Value types for the authenticated session: the credentials a caller
//! supplies to log in or register, and the token set handed back by the
//! auth service. Tokens live in memory only and are written exclusively by
//! login/register/logout.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Tokens for an authenticated backend session
///
/// Held by the request router for the lifetime of a session and cleared on
/// logout. Single-writer rule: only login, register, and logout mutate the
/// stored tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthTokens {
    /// Bearer token attached to backend calls
    pub access_token: String,
    /// Token used to obtain a fresh access token (if issued)
    pub refresh_token: Option<String>,
    /// When the access token expires (if reported)
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthTokens {
    /// Create a token set with only an access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Set the refresh token
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Set the expiry time
    #[must_use]
    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Whether the access token is past its reported expiry
    ///
    /// Tokens without a reported expiry are treated as unexpired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Extract tokens from an auth response body
    ///
    /// Accepts either an absolute `expires_at` (RFC 3339) or a relative
    /// `expires_in` (seconds). Returns `None` when no access token is
    /// present.
    #[must_use]
    pub fn from_response(body: &Value) -> Option<Self> {
        let access_token = body.get("access_token")?.as_str()?.to_string();
        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string);

        let expires_at = body
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| {
                body.get("expires_in")
                    .and_then(Value::as_i64)
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });

        Some(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// Credentials supplied by the caller for login or registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
    /// Display name, sent on registration only
    pub full_name: Option<String>,
}

impl Credentials {
    /// Create credentials for login
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            full_name: None,
        }
    }

    /// Set the display name used at registration
    #[must_use]
    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    /// Request body for the login endpoint
    #[must_use]
    pub fn login_body(&self) -> Value {
        json!({
            "email": self.email,
            "password": self.password,
        })
    }

    /// Request body for the registration endpoint
    #[must_use]
    pub fn register_body(&self) -> Value {
        let mut body = self.login_body();
        if let Some(ref name) = self.full_name {
            body["full_name"] = json!(name);
        }
        body
    }
}
