use http::header;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::models::chat::ChatCompletionRequest;

/// Client for the upstream Chat Completions endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, config: &ProxyConfig) -> Self {
        Self {
            http,
            completions_url: config.completions_url(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    /// POST the request upstream. Non-2xx answers become [`ProxyError::Upstream`] carrying
    /// the raw status and body.
    pub async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, ProxyError> {
        let streaming = request.stream.unwrap_or(false);

        let mut rb = self
            .http
            .post(&self.completions_url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request);
        if streaming {
            rb = rb.header(header::ACCEPT, "text/event-stream");
        }
        if let Some(key) = self.api_key.as_deref() {
            rb = rb.bearer_auth(key);
        }

        tracing::debug!(url = %self.completions_url, model = %request.model, streaming, "sending upstream request");
        let resp = rb.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
            let body = resp.bytes().await.unwrap_or_default();
            tracing::error!(%status, body = %String::from_utf8_lossy(&body), "upstream returned an error");
            return Err(ProxyError::Upstream {
                status,
                content_type,
                body,
            });
        }
        Ok(resp)
    }
}
