use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// User-facing message constants, kept in one place so handlers and tests
/// agree on exact wording.
pub mod msg {
    pub const PLAN_NOT_FOUND: &str = "Plan not found";
    pub const INTENT_NOT_FOUND: &str = "Payment not found";
    pub const REFERRAL_CODE_NOT_FOUND: &str = "Unknown referral code";
    pub const INVALID_CORRELATION_ID: &str = "Invalid correlation ID";
    pub const CORRELATION_ID_REUSED: &str =
        "Correlation ID already used for a different payment";
    pub const MISSING_SIGNATURE_HEADER: &str = "Missing X-Gateway-Signature header";
    pub const INVALID_SIGNATURE: &str = "Invalid signature";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment gateway could not be reached or returned a 5xx.
    /// The caller may retry the same request with backoff.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The payment gateway rejected the request outright (bad amount,
    /// unsupported currency). Retrying the same request cannot succeed.
    #[error("Gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    /// Set when the client should retry the same request after a delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details, retry_after) = match &self {
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "Not found", Some(msg.clone()), None)
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()), None)
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None, None),
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, "Conflict", Some(msg.clone()), None)
            }
            AppError::GatewayUnavailable(msg) => {
                tracing::warn!("Gateway unavailable: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment gateway unavailable",
                    None,
                    Some(5),
                )
            }
            AppError::GatewayRejected(msg) => (
                StatusCode::BAD_REQUEST,
                "Payment gateway rejected the request",
                Some(msg.clone()),
                None,
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                    None,
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                    None,
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()), None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            retry_after_seconds: retry_after,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for turning `Option` lookups into `NotFound` errors.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}
