//! Bearer-token authentication.
//!
//! The configured token is never compared byte-by-byte. At startup a random
//! key is drawn and only `HMAC-SHA256(key, token)` is kept; each request's
//! token is run through the same MAC and checked with the constant-time
//! `verify_slice`.

use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

type HmacSha256 = Hmac<Sha256>;

/// Verifier for `Authorization: Bearer <token>` headers.
#[derive(Clone)]
pub struct BearerAuth {
    enabled: bool,
    key: [u8; 32],
    /// MAC of the configured token. `None` when no token is configured, in
    /// which case every request is rejected while auth is enabled.
    expected: Option<Vec<u8>>,
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("enabled", &self.enabled)
            .field("token_configured", &self.expected.is_some())
            .finish()
    }
}

impl BearerAuth {
    pub fn from_config(config: &lc_core::config::AuthConfig) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key);

        let expected = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .and_then(|t| mac_for(&key, t))
            .map(|mac| mac.finalize().into_bytes().to_vec());

        Self {
            enabled: config.enabled,
            key,
            expected,
        }
    }

    /// A verifier that admits every request.
    pub fn disabled() -> Self {
        Self::from_config(&lc_core::config::AuthConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check a raw `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`lc_core::Error::Unauthorized`] when auth is enabled and the
    /// header is missing, not a bearer credential, or carries the wrong token.
    pub fn verify(&self, authorization: Option<&str>) -> lc_core::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let header = authorization
            .ok_or_else(|| lc_core::Error::Unauthorized("missing bearer token".into()))?;
        let token = bearer_token(header)
            .ok_or_else(|| lc_core::Error::Unauthorized("malformed authorization header".into()))?;

        let matches = match (&self.expected, mac_for(&self.key, token)) {
            (Some(expected), Some(mac)) => mac.verify_slice(expected).is_ok(),
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            Err(lc_core::Error::Unauthorized("invalid bearer token".into()))
        }
    }
}

fn mac_for(key: &[u8], token: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(token.as_bytes());
    Some(mac)
}

/// Token part of `Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authentication middleware. Applied to protected routes only.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match ctx.auth.verify(authorization) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::info!(path = %request.uri().path(), "Rejected request: {e}");
            let mut err = AppError::new(e);
            if let Some(id) = request.extensions().get::<RequestId>() {
                err = err.with_request_id(id.0.clone());
            }
            err.into_response()
        }
    }
}
