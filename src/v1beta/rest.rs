use super::retry::{RetryPolicy, Retrying, Sleeper, TokioSleeper};
use super::transport::{HttpReply, HttpRequest, ReqwestTransport, Transport};
use super::{API_BASE, DEFAULT_MODEL, models, request, response};
use async_trait::async_trait;
use derive_new::new;
use derive_setters::Setters;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Environment variable overriding [`DEFAULT_MODEL`].
pub const MODEL_ENV: &str = "GEMINI_MODEL";
/// Per-attempt network timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("no API key configured, set GEMINI_API_KEY")]
    MissingCredential,
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response has no candidate with a text part")]
    NoContent,
    #[error("{layer} layer gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        layer: &'static str,
        attempts: u32,
        last: Box<Error>,
    },
}

impl Error {
    /// The innermost error, looking through [`Error::ExhaustedRetries`].
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::ExhaustedRetries { last, .. } => last.root_cause(),
            other => other,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self.root_cause() {
            Error::Status { status, .. } => Some(*status),
            Error::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// Bad payloads are reported as warnings rather than failures of the service.
    pub fn is_malformed_response(&self) -> bool {
        matches!(self.root_cause(), Error::Json(_) | Error::NoContent)
    }
}

#[derive(Clone, new, Setters)]
#[setters(prefix = "with_", into, strip_option)]
pub struct Client {
    #[setters(skip)]
    #[new(into)]
    api_key: Option<String>,
    #[setters(skip)]
    #[new(into)]
    model: String,
    #[new(value = "API_BASE.to_string()")]
    api_base: String,
    #[new(value = "DEFAULT_TIMEOUT")]
    timeout: Duration,
    #[new(value = "RetryPolicy::transport()")]
    transport_policy: RetryPolicy,
    #[new(value = "RetryPolicy::application()")]
    retry_policy: RetryPolicy,
    #[setters(skip)]
    #[new(value = "Arc::new(ReqwestTransport::default())")]
    transport: Arc<dyn Transport>,
    #[setters(skip)]
    #[new(value = "Arc::new(TokioSleeper)")]
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("transport_policy", &self.transport_policy)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Reads the API key from `GEMINI_API_KEY` and the model from `GEMINI_MODEL`.
    /// An unset or blank key is kept as absent so calls fail fast without I/O.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty());
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_key, model)
    }

    /// Replaces the HTTP transport. The transport retry layer is still applied on top.
    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Replaces how backoff waits are performed.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generates text for `prompt`, or `None` when no text could be obtained.
    ///
    /// Every failure is logged here and absorbed; the caller decides what to use instead.
    pub async fn generate(&self, prompt: &str) -> Option<String> {
        match self.generate_text(prompt).await {
            Ok(text) => Some(text),
            Err(e) if e.is_malformed_response() => {
                warn!(model = %self.model, error = %e, "no content in response");
                None
            }
            Err(e) => {
                error!(model = %self.model, status = e.status().map(|s| s.as_u16()), error = %e, "generation failed");
                None
            }
        }
    }

    /// Generates text for `prompt`, returning the first part of the first candidate.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, Error> {
        let api_key = self.api_key()?;
        if prompt.trim().is_empty() {
            return Err(Error::EmptyPrompt);
        }

        let request = request::Request::prompt(prompt);
        let response = self.send_generate(api_key, &request).await?;
        let text = response.text().ok_or(Error::NoContent)?;
        info!(model = %self.model, chars = text.len(), "generated content");
        Ok(text.to_string())
    }

    pub async fn generate_content(
        &self,
        request: request::Request,
    ) -> Result<response::Response, Error> {
        let api_key = self.api_key()?;
        self.send_generate(api_key, &request).await
    }

    /// Lists every model available to the key, following pagination.
    pub async fn list_models(&self) -> Result<Vec<models::Model>, Error> {
        let api_key = self.api_key()?;
        let mut found = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url("models")?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let request = HttpRequest {
                method: Method::GET,
                url,
                api_key: api_key.to_string(),
                body: None,
                timeout: self.timeout,
                idempotent: true,
            };

            let page: models::ListModelsResponse = self.call(&request).await?;
            found.extend(page.models);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(found)
    }

    async fn send_generate(
        &self,
        api_key: &str,
        request: &request::Request,
    ) -> Result<response::Response, Error> {
        let request = HttpRequest {
            method: Method::POST,
            url: self.url(&format!("{}:generateContent", self.model))?,
            api_key: api_key.to_string(),
            body: Some(serde_json::to_value(request)?),
            timeout: self.timeout,
            // generateContent has no side effects, so replaying it is safe.
            idempotent: true,
        };
        self.call(&request).await
    }

    /// One logical call: the application policy around the transport policy around
    /// a single HTTP exchange, decoding included.
    async fn call<T: serde::de::DeserializeOwned>(&self, request: &HttpRequest) -> Result<T, Error> {
        let transport = Retrying::new(
            Arc::clone(&self.transport),
            self.transport_policy,
            Arc::clone(&self.sleeper),
        );

        let transport = &transport;

        self.retry_policy
            .run(self.sleeper.as_ref(), || async move {
                let reply: HttpReply = transport.send(request).await?;
                Ok::<T, Error>(serde_json::from_str(&reply.body)?)
            })
            .await
    }

    fn api_key(&self) -> Result<&str, Error> {
        self.api_key.as_deref().ok_or(Error::MissingCredential)
    }

    fn url(&self, path: &str) -> Result<url::Url, Error> {
        let base = self.api_base.trim_end_matches('/');
        Ok(url::Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))?)
    }
}

/// Anything that turns a prompt into text, or declines to.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Option<String>;
}

#[async_trait]
impl TextGenerator for Client {
    async fn generate(&self, prompt: &str) -> Option<String> {
        Client::generate(self, prompt).await
    }
}
