use std::any::Any;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::conversion::{convert_request, ConvertedRequest};
use crate::error::{error_response, ProxyError};
use crate::response::to_messages_response;
use crate::streaming::{relay_events, StreamTranslator};
use crate::upstream::UpstreamClient;
use crate::util::{build_http_client_from_env, cors_layer_from_env, mask_secret, DebugLog};

/// Response header listing request parameters removed during translation.
pub const DROPPED_PARAMS_HEADER: &str = "x-dropped-params";

const ROUTES: &[&str] = &["/", "/v1/messages", "/convert"];

/// Shared application state used by the HTTP server and handlers. Read-only after startup.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub upstream: UpstreamClient,
    pub debug: DebugLog,
}

impl AppState {
    pub fn new(config: ProxyConfig, http: reqwest::Client) -> Self {
        Self {
            upstream: UpstreamClient::new(http, &config),
            debug: DebugLog::new(config.debug),
            config,
        }
    }

    /// State with an HTTP client configured from the environment.
    pub fn from_config(config: ProxyConfig) -> Self {
        Self::new(config, build_http_client_from_env())
    }
}

/// Build the Axum router with `/`, `/v1/messages` and `/convert`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/v1/messages", post(messages))
        .route("/convert", post(convert))
        .with_state(Arc::new(state))
        .layer(cors_layer_from_env())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", detail)
}

/// Service status endpoint exposing the effective configuration and available routes.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    let dialect = config.dialect();
    Json(json!({
        "name": "messages2chat",
        "version": env!("CARGO_PKG_VERSION"),
        "dialect": dialect.name(),
        "upstream": {
            "base_url": config.base_url,
            "completions_url": state.upstream.completions_url(),
            "credential_env": dialect.credential_env,
            "api_key": config.api_key.as_deref().map(mask_secret),
        },
        "models": {
            "reasoning": config.reasoning_model,
            "completion": config.completion_model,
        },
        "debug": config.debug,
        "routes": ROUTES,
    }))
}

/// Preview the upstream Chat Completions request without calling upstream.
async fn convert(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ProxyError> {
    let converted = convert_request(parse_json_body(&body)?, &state.config)?;
    let mut resp = Json(json!({
        "request": converted.request,
        "dropped_params": converted.dropped.as_slice(),
    }))
    .into_response();
    attach_dropped_params(&mut resp, &converted);
    Ok(resp)
}

/// Translate a Messages request, forward it upstream, and translate the answer back.
/// - Non-streaming: JSON roundtrip
/// - Streaming: SSE re-emission
async fn messages(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ProxyError> {
    let body = parse_json_body(&body)?;
    state.debug.payload("inbound Messages request", &body);

    let converted = convert_request(body, &state.config)?;
    state.debug.payload("upstream Chat Completions request", &converted.request);

    let result = forward(&state, &converted).await;
    let mut resp = match result {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    };
    attach_dropped_params(&mut resp, &converted);
    Ok(resp)
}

async fn forward(state: &AppState, converted: &ConvertedRequest) -> Result<Response, ProxyError> {
    let upstream = state.upstream.send(&converted.request).await?;

    if converted.stream {
        let translator = StreamTranslator::new(converted.downstream_model.clone());
        let debug = state.debug;
        let frames = relay_events(upstream.bytes_stream(), translator).inspect(move |frame| {
            if let Ok(bytes) = frame {
                debug.text("downstream event", String::from_utf8_lossy(bytes).trim_end());
            }
        });
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(frames))
            .map_err(|e| ProxyError::Internal(e.to_string()));
    }

    let bytes = upstream.bytes().await?;
    let body: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::InvalidUpstream(format!("response is not JSON: {e}")))?;
    state.debug.payload("upstream Chat Completions response", &body);

    let message = to_messages_response(&body, &converted.downstream_model)?;
    state.debug.payload("downstream Messages response", &message);
    Ok(Json(message).into_response())
}

fn parse_json_body(body: &[u8]) -> Result<Value, ProxyError> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::InvalidRequest(format!("request body is not valid JSON: {e}")))
}

fn attach_dropped_params(resp: &mut Response, converted: &ConvertedRequest) {
    let Some(value) = converted.dropped.header_value() else {
        return;
    };
    match HeaderValue::from_str(&value) {
        Ok(hv) => {
            resp.headers_mut().insert(DROPPED_PARAMS_HEADER, hv);
        }
        Err(e) => tracing::warn!(error = %e, "dropped parameter list is not a valid header value"),
    }
}
