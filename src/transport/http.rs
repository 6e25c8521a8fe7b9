use crate::config::HttpConfig;
use crate::error::LlmError;
use crate::streaming::{FrameStream, SseFrame};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

/// Transport-level request data.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, LlmError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LlmError::ConfigurationError(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| LlmError::ConfigurationError(format!("Invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_bearer(self, token: &str) -> Result<Self, LlmError> {
        self.with_header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }
}

/// Request/response and SSE transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// One request, JSON response body.
    async fn execute_json(&self, request: TransportRequest) -> Result<Value, LlmError>;

    /// One request whose response body is an event stream.
    async fn execute_sse(&self, request: TransportRequest)
    -> Result<FrameStream<SseFrame>, LlmError>;
}

/// Build a reqwest client from configuration.
pub fn build_http_client(config: &HttpConfig) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(timeout) = config.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent);
    }
    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| LlmError::ConfigurationError(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| LlmError::ConfigurationError(format!("Failed to build HTTP client: {e}")))
}

fn header_map(headers: &std::collections::HashMap<String, String>) -> Result<HeaderMap, LlmError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LlmError::ConfigurationError(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| LlmError::ConfigurationError(format!("Invalid header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    default_headers: HeaderMap,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            default_headers: HeaderMap::new(),
        }
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http_client(config)?,
            default_headers: header_map(&config.headers)?,
        })
    }

    async fn send(&self, request: TransportRequest) -> Result<reqwest::Response, LlmError> {
        let mut headers = self.default_headers.clone();
        headers.extend(request.headers);

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(url = %request.url, "sending request");
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::http_status(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute_json(&self, request: TransportRequest) -> Result<Value, LlmError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LlmError::ParseError(format!("Invalid JSON response: {e}")))
    }

    async fn execute_sse(
        &self,
        mut request: TransportRequest,
    ) -> Result<FrameStream<SseFrame>, LlmError> {
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let response = self.send(request).await?;
        let frames = response.bytes_stream().eventsource().map(|event| {
            event
                .map(SseFrame::from)
                .map_err(|e| LlmError::transport(format!("SSE stream error: {e}"), true))
        });
        Ok(Box::pin(frames))
    }
}
