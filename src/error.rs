//! ==============================================================================
//! error.rs - request-level failures and their http mapping
//! ==============================================================================
//!
//! every failure a handler can hit ends up here as a GatewayError, which axum
//! turns into a json body with a machine-readable `error` code. nothing in
//! this module panics, so a broken upstream never takes the server down.
//!
//! ==============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// command body missing, not json, or not OPEN/CLOSE/AUTO
    #[error("bad command")]
    BadCommand,

    /// upstream did not answer within the configured timeout
    #[error("upstream timed out: {0}")]
    Timeout(String),

    /// connection refused, dns failure, tls error, body read error
    #[error("upstream unreachable: {0}")]
    Transport(String),

    /// upstream answered with a non-success status
    #[error("upstream returned status {0}")]
    Status(u16),

    /// upstream answered 200 but the body was not the json we expect
    #[error("upstream sent malformed data: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadCommand => "bad_cmd",
            GatewayError::Timeout(_) => "upstream_timeout",
            GatewayError::Transport(_) => "upstream_unreachable",
            GatewayError::Status(_) => "upstream_status",
            GatewayError::Malformed(_) => "upstream_malformed",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadCommand => StatusCode::BAD_REQUEST,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Transport(_)
            | GatewayError::Status(_)
            | GatewayError::Malformed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::Status(status.as_u16())
        } else if e.is_decode() {
            GatewayError::Malformed(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Malformed(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = match &self {
            // same shape as a command result so the dashboard reads `ok` either way
            GatewayError::BadCommand => json!({ "ok": false, "error": self.code() }),
            GatewayError::Status(status) => json!({
                "error": self.code(),
                "status": status,
                "detail": self.to_string(),
            }),
            _ => json!({ "error": self.code(), "detail": self.to_string() }),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
