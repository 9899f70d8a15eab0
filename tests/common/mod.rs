#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{self, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use messages2chat::config::ProxyConfig;
use messages2chat::server::{build_router, AppState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Utilities for end-to-end proxy tests.
///
/// Two servers are spawned on ephemeral local ports: a scripted mock upstream speaking
/// Chat Completions, and the real router configured to forward to it. No process
/// environment is mutated, so tests can run in parallel.
pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    join: JoinHandle<()>,
    client: reqwest::Client,
}

impl TestServer {
    fn make_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed building reqwest client")
    }

    /// Perform a GET relative to the server base URL.
    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    /// Perform a POST with JSON body.
    pub async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header(http::header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// What the mock upstream answers with.
#[derive(Clone)]
pub enum MockReply {
    Json(StatusCode, serde_json::Value),
    /// SSE body delivered as the given network chunks, in order.
    Sse(Vec<String>),
}

/// A request the mock upstream received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct MockState {
    reply: MockReply,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

pub struct MockUpstream {
    pub base_url: String,
    seen: Arc<Mutex<Vec<Recorded>>>,
    join: JoinHandle<()>,
}

impl MockUpstream {
    pub fn requests(&self) -> Vec<Recorded> {
        self.seen.lock().expect("mock lock").clone()
    }

    pub fn last_request(&self) -> Recorded {
        self.requests()
            .pop()
            .expect("mock upstream received no request")
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.join.abort();
    }
}

async fn mock_completions(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: http::header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.seen.lock().expect("mock lock").push(Recorded {
        authorization: header(http::header::AUTHORIZATION),
        accept: header(http::header::ACCEPT),
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });

    match state.reply {
        MockReply::Json(status, value) => (status, Json(value)).into_response(),
        MockReply::Sse(chunks) => {
            let stream = futures_util::stream::iter(
                chunks
                    .into_iter()
                    .map(|c| Ok::<_, std::convert::Infallible>(Bytes::from(c))),
            );
            Response::builder()
                .header(http::header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(stream))
                .expect("mock sse response")
        }
    }
}

async fn serve(app: Router) -> (String, SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let join = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Test server error: {e:?}");
        }
    });
    (format!("http://{addr}"), addr, join)
}

/// Spawn a mock Chat Completions upstream answering every request with `reply`.
pub async fn spawn_mock_upstream(reply: MockReply) -> MockUpstream {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v1/chat/completions", post(mock_completions))
        .with_state(MockState {
            reply,
            seen: seen.clone(),
        });
    let (base_url, _, join) = serve(app).await;
    MockUpstream {
        base_url: format!("{base_url}/v1"),
        seen,
        join,
    }
}

/// Spawn the proxy router forwarding to `upstream_base_url`.
pub async fn spawn_proxy(config: ProxyConfig) -> TestServer {
    let app = build_router(AppState::new(config, TestServer::make_client()));
    let (base_url, addr, join) = serve(app).await;
    TestServer {
        base_url,
        addr,
        join,
        client: TestServer::make_client(),
    }
}

/// Proxy configuration pointing at a mock upstream.
pub fn config_for(upstream: &MockUpstream) -> ProxyConfig {
    ProxyConfig {
        base_url: upstream.base_url.clone(),
        api_key: Some("sk-upstream-test".into()),
        ..ProxyConfig::default()
    }
}

/// Minimal Messages request body.
pub fn sample_messages_request() -> serde_json::Value {
    serde_json::json!({
        "model": "claude-test",
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "Hello test server"}]
    })
}

/// Split an SSE response body into `(event, data)` pairs.
pub fn parse_sse(body: &str) -> Vec<(String, serde_json::Value)> {
    body.split("\n\n")
        .filter(|f| !f.trim().is_empty())
        .map(|frame| {
            let mut event = String::new();
            let mut data = serde_json::Value::Null;
            for line in frame.lines() {
                if let Some(e) = line.strip_prefix("event: ") {
                    event = e.to_string();
                } else if let Some(d) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(d).expect("frame data is JSON");
                }
            }
            (event, data)
        })
        .collect()
}
