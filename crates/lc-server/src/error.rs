//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`lc_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable detail. Never contains engine output or paths.
    pub error: String,
    /// Stable error kind, e.g. `unsupported_format` or `conversion_timeout`.
    pub code: String,
    pub request_id: Option<String>,
    /// Valid alternatives; present only for `unsupported_format`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported: Option<Vec<String>>,
}

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: lc_core::Error,
    request_id: Option<String>,
    reported: bool,
}

impl AppError {
    pub fn new(inner: lc_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
            reported: false,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// The handler has already logged this failure; skip the generic log.
    pub fn reported(mut self) -> Self {
        self.reported = true;
        self
    }
}

impl From<lc_core::Error> for AppError {
    fn from(e: lc_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() && !self.reported {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let supported = match self.inner {
            lc_core::Error::UnsupportedFormat { ref supported, .. } => Some(supported.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.inner.public_message(),
            code: self.inner.code().to_string(),
            request_id: self.request_id,
            supported,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = self.inner.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
