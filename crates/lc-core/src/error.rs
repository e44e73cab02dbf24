//! Unified error type for the conversion service.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::time::Duration;

/// Unified error type covering all failure modes of a conversion request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request data was malformed (missing field, missing filename, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The input format is unknown, or the output is not reachable from it.
    #[error("{message}")]
    UnsupportedFormat {
        /// Human-readable description of the rejected pair.
        message: String,
        /// The alternatives the caller may use instead.
        supported: Vec<String>,
    },

    /// The upload exceeded the configured maximum size.
    #[error("File too large: maximum upload size is {limit} bytes")]
    TooLarge {
        /// Configured limit in bytes.
        limit: u64,
    },

    /// All conversion slots stayed busy for the whole admission wait.
    #[error("Too many concurrent conversions, retry in {retry_after_secs}s")]
    AdmissionRejected {
        /// Suggested client back-off.
        retry_after_secs: u64,
    },

    /// The conversion engine exceeded its wall-clock budget and was killed.
    #[error("Conversion timed out after {}s", .timeout.as_secs())]
    ConversionTimeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The engine ran but did not produce a usable document.
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// An external tool could not be started at all.
    #[error("Failed to start {tool}: {source}")]
    ToolSpawn {
        /// Name of the tool that could not be started.
        tool: String,
        /// The error returned by the spawn call.
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description (may contain engine output).
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Unauthorized(_) => 401,
            Error::Validation(_) => 400,
            Error::UnsupportedFormat { .. } => 400,
            Error::TooLarge { .. } => 413,
            Error::AdmissionRejected { .. } => 429,
            Error::ConversionTimeout { .. } => 500,
            Error::ConversionFailed(_) => 500,
            Error::ToolSpawn { .. } | Error::Tool { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "unauthorized",
            Error::Validation(_) => "bad_request",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::TooLarge { .. } => "too_large",
            Error::AdmissionRejected { .. } => "admission_rejected",
            Error::ConversionTimeout { .. } => "conversion_timeout",
            Error::ConversionFailed(_) | Error::ToolSpawn { .. } | Error::Tool { .. } => {
                "conversion_failed"
            }
            Error::Io { .. } | Error::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to hand to a client.
    ///
    /// Tool, I/O, and internal errors may embed engine output, filesystem
    /// paths, or command lines, so they collapse to a generic sentence.
    pub fn public_message(&self) -> String {
        match self {
            Error::ToolSpawn { .. } => "Conversion failed: the conversion engine is unavailable".into(),
            Error::Tool { .. } => "Conversion failed: the conversion engine reported an error".into(),
            Error::Io { .. } | Error::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }

    /// Back-off hint for errors the client is expected to retry.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::AdmissionRejected { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::UnsupportedFormat`].
    pub fn unsupported(message: impl Into<String>, supported: Vec<String>) -> Self {
        Error::UnsupportedFormat {
            message: message.into(),
            supported,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
