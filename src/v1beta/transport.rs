//! The single-attempt HTTP seam underneath [`super::rest::Client`].
//!
//! A [`Transport`] performs exactly one exchange and reports any non-2xx status as
//! [`Error::Status`]. Retrying is layered on top by [`super::retry::Retrying`].

use super::rest::Error;
use async_trait::async_trait;
use reqwest::{Method, StatusCode, header};
use std::time::Duration;
use tracing::debug;

/// Header carrying the API key on every request.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: url::Url,
    pub api_key: String,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
    /// Whether the transport layer may replay this request on a retryable status.
    pub idempotent: bool,
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpReply, Error>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: &HttpRequest) -> Result<HttpReply, Error> {
        (**self).send(request).await
    }
}

/// [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpReply, Error> {
        debug!(method = %request.method, url = %redacted(&request.url), "sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout)
            .header(header::USER_AGENT, env!("CARGO_CRATE_NAME"))
            .header(API_KEY_HEADER, &request.api_key);
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;

        debug!(status = status.as_u16(), bytes = body.len(), "received response");

        if !status.is_success() {
            return Err(Error::Status {
                status,
                retry_after,
                body,
            });
        }
        Ok(HttpReply { status, body })
    }
}

/// `Retry-After` in its delay-seconds form. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn redacted(url: &url::Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
