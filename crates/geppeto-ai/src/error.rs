//! Error types for geppeto-ai

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Result type alias using geppeto-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a completion endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint rejected the request with a structured `{code, message}` body
    #[error("API error: {message} (code: {code})")]
    Api {
        code: ApiErrorCode,
        message: String,
        status: Option<u16>,
    },

    /// Non-2xx response without a structured error body
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No API key configured
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// The request was cancelled by the caller
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events framing error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Request failed validation before dispatch
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Context overflow / too many tokens
    #[error("Context overflow: {0}")]
    ContextOverflow(String),
}

/// Error codes the completion endpoint reports under `error.code`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    ModelNotFound,
    ContextLengthExceeded,
    InvalidApiKey,
    InsufficientQuota,
    Other(String),
}

impl ApiErrorCode {
    /// Parse a wire code. Never fails: unknown codes land in `Other`.
    pub fn parse(code: &str) -> Self {
        match code {
            "model_not_found" => Self::ModelNotFound,
            "context_length_exceeded" => Self::ContextLengthExceeded,
            "invalid_api_key" => Self::InvalidApiKey,
            "insufficient_quota" => Self::InsufficientQuota,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire representation of this code
    pub fn as_str(&self) -> &str {
        match self {
            Self::ModelNotFound => "model_not_found",
            Self::ContextLengthExceeded => "context_length_exceeded",
            Self::InvalidApiKey => "invalid_api_key",
            Self::InsufficientQuota => "insufficient_quota",
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    message: String,
}

impl Error {
    /// Create an API error from a wire code and message
    pub fn api(code: impl AsRef<str>, message: impl Into<String>) -> Self {
        Self::Api {
            code: ApiErrorCode::parse(code.as_ref()),
            message: message.into(),
            status: None,
        }
    }

    /// Build an error from a non-2xx response body.
    ///
    /// Bodies shaped like `{"error": {"code": ..., "message": ...}}` become
    /// [`Error::Api`]; anything else is kept verbatim in [`Error::Status`].
    pub fn from_response_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .code
                    .or(envelope.error.error_type)
                    .unwrap_or_default();
                Self::Api {
                    code: ApiErrorCode::parse(&code),
                    message: envelope.error.message,
                    status: Some(status),
                }
            }
            Err(_) => Self::Status {
                status,
                body: body.to_string(),
            },
        }
    }

    /// The structured upstream code, if the endpoint sent one
    pub fn api_code(&self) -> Option<&ApiErrorCode> {
        match self {
            Error::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this error is a caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Check if this error indicates a context overflow / too many tokens
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Error::ContextOverflow(_) => true,
            Error::Api { code, message, .. } => {
                *code == ApiErrorCode::ContextLengthExceeded || is_context_overflow(message)
            }
            Error::Status { body, .. } => is_context_overflow(body),
            _ => false,
        }
    }
}

/// Patterns that indicate a context overflow in free-form error text
static OVERFLOW_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)context.?length.?exceed",
        r"(?i)maximum.?context.?length",
        r"(?i)too.?many.?tokens",
        r"(?i)reduce.?the.?length",
        r"(?i)token.?limit.?(exceed|reach)",
        r"(?i)prompt.?is.?too.?long",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Check if free-form error text describes a context overflow
pub fn is_context_overflow(error: &str) -> bool {
    OVERFLOW_PATTERNS.iter().any(|re| re.is_match(error))
}
