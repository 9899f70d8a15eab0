//! Error type shared by the conversion engine and the HTTP layer.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Upstream answered with a non-2xx status; relayed verbatim.
    #[error("upstream returned {status}")]
    Upstream {
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },
    /// Upstream answered 2xx but the body carries an `error` object.
    #[error("upstream error: {0}")]
    UpstreamLogical(String),
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Upstream answered 2xx with a body that is not a Chat Completions response.
    #[error("invalid upstream response: {0}")]
    InvalidUpstream(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::UpstreamLogical(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Transport(_) | ProxyError::InvalidUpstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Messages API error `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Upstream { .. } => "upstream_error",
            ProxyError::UpstreamLogical(_) => "api_error",
            ProxyError::Transport(_) | ProxyError::InvalidUpstream(_) => "bad_gateway",
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    /// Message without the variant prefix, as carried in the error body.
    pub fn message(&self) -> String {
        match self {
            ProxyError::Upstream { status, .. } => format!("upstream returned {status}"),
            ProxyError::UpstreamLogical(msg)
            | ProxyError::InvalidUpstream(msg)
            | ProxyError::InvalidRequest(msg)
            | ProxyError::Internal(msg) => msg.clone(),
            ProxyError::Transport(e) => e.to_string(),
        }
    }
}

/// `{"type":"error","error":{"type":..,"message":..}}` with the given status.
pub fn error_response(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    let body = json!({
        "type": "error",
        "error": { "type": kind, "message": message.into() }
    });
    (status, Json(body)).into_response()
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Upstream {
                status,
                content_type,
                body,
            } => {
                let mut resp = (status, body).into_response();
                let ct = content_type
                    .unwrap_or_else(|| HeaderValue::from_static("application/json"));
                resp.headers_mut().insert(header::CONTENT_TYPE, ct);
                resp
            }
            other => {
                match &other {
                    ProxyError::InvalidRequest(msg) => tracing::debug!("rejecting request: {msg}"),
                    _ => tracing::error!(error = %other, "request failed"),
                }
                error_response(other.status(), other.kind(), other.message())
            }
        }
    }
}
