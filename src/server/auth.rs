//! Bearer token and API key authentication.
//!
//! # Bearer Tokens
//!
//! Tokens are self-contained and signed with the server secret:
//!
//! ```text
//! token     = "{user_id}.{expiry}.{signature}"
//! signature = hex(HMAC-SHA256(secret, "{user_id}.{expiry}"))
//! ```
//!
//! `expiry` is a Unix timestamp in seconds. The token is split from the
//! right, so user ids may themselves contain dots.
//!
//! API routes read the token from `Authorization: Bearer <token>`. Viewer
//! routes also accept `?token=<token>`, because Deep Zoom viewers fetch tiles
//! with plain image requests that cannot carry headers.
//!
//! # Webhook
//!
//! The inference service authenticates its callbacks with a shared key in
//! the `X-API-Key` header.
//!
//! Signatures and keys are compared in constant time.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::form_urlencoded;

use crate::error::ErrorKind;

// =============================================================================
// Types
// =============================================================================

/// HMAC-SHA256 type alias
type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Authentication failures. All map to 401.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed bearer token")]
    MalformedToken,

    #[error("Token expired at {expired_at} (current time: {current_time})")]
    Expired { expired_at: u64, current_time: u64 },

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Missing or invalid API key")]
    InvalidApiKey,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Unauthorized
    }
}

/// The authenticated caller, added to request extensions by the middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Bearer Tokens
// =============================================================================

/// Issues and verifies signed bearer tokens.
#[derive(Clone)]
pub struct TokenAuth {
    secret: Arc<[u8]>,
}

impl TokenAuth {
    /// # Arguments
    ///
    /// * `secret` - HMAC key. Should be at least 32 bytes.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Issue a token for `user_id` valid for `ttl`.
    ///
    /// Returns the token and its expiry timestamp.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> (String, u64) {
        let expiry = now_secs() + ttl.as_secs();
        (self.issue_with_expiry(user_id, expiry), expiry)
    }

    /// Issue a token expiring at a specific Unix timestamp.
    pub fn issue_with_expiry(&self, user_id: &str, expiry: u64) -> String {
        format!(
            "{}.{}.{}",
            user_id,
            expiry,
            hex::encode(self.signature(user_id, expiry))
        )
    }

    /// Verify a token and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.verify_at(token, now_secs())
    }

    /// [`verify`](Self::verify) against a given current time.
    pub fn verify_at(&self, token: &str, current_time: u64) -> Result<String, AuthError> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(expiry), Some(user_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::MalformedToken);
        };
        if user_id.is_empty() {
            return Err(AuthError::MalformedToken);
        }
        let expiry: u64 = expiry.parse().map_err(|_| AuthError::MalformedToken)?;
        let provided = hex::decode(signature).map_err(|_| AuthError::MalformedToken)?;

        // Expiry is only reported for correctly signed tokens
        let expected = self.signature(user_id, expiry);
        if !bool::from(provided.ct_eq(&expected)) {
            return Err(AuthError::InvalidSignature);
        }
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }
        Ok(user_id.to_string())
    }

    fn signature(&self, user_id: &str, expiry: u64) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(user_id.as_bytes());
        mac.update(b".");
        mac.update(expiry.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

fn query_token(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

// =============================================================================
// Webhook Key
// =============================================================================

/// Shared-key check for inference service callbacks.
#[derive(Clone)]
pub struct ApiKeyAuth {
    key: Arc<[u8]>,
}

impl ApiKeyAuth {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: Arc::from(key.as_ref()),
        }
    }

    pub fn verify(&self, provided: Option<&str>) -> Result<(), AuthError> {
        let Some(provided) = provided else {
            return Err(AuthError::InvalidApiKey);
        };
        if self.key.is_empty() || !bool::from(provided.as_bytes().ct_eq(&self.key)) {
            return Err(AuthError::InvalidApiKey);
        }
        Ok(())
    }
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Require `Authorization: Bearer <token>`.
///
/// On success the caller's [`AuthUser`] is added to the request extensions.
pub async fn require_bearer(
    State(auth): State<TokenAuth>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(request.headers()).ok_or(AuthError::MissingToken)?;
    let user = auth.verify(token)?;
    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}

/// Like [`require_bearer`], but also accepts `?token=`.
pub async fn require_viewer_token(
    State(auth): State<TokenAuth>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_string(),
        None => query_token(request.uri().query()).ok_or(AuthError::MissingToken)?,
    };
    let user = auth.verify(&token)?;
    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}

/// Require the webhook key in `X-API-Key`.
pub async fn require_api_key(
    State(auth): State<ApiKeyAuth>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    auth.verify(provided)?;
    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================
