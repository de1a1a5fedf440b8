use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// One API call, addressed by path segments relative to the API base URL.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path())
            .field("has_bearer", &self.bearer.is_some())
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl ApiRequest {
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Get,
            segments: segments.into_iter().map(Into::into).collect(),
            bearer: None,
            body: None,
        }
    }

    pub fn post<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Post,
            segments: segments.into_iter().map(Into::into).collect(),
            bearer: None,
            body: Some(body),
        }
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    /// Route path with the trailing slash the server expects, e.g.
    /// `/todo/todos/5/`.
    pub fn path(&self) -> String {
        let mut path = String::from("/");
        for segment in &self.segments {
            path.push_str(segment);
            path.push('/');
        }
        path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// The request never produced an HTTP status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

/// `reqwest`-backed transport with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = reqwest::Url::parse(base_url.trim())
            .with_context(|| format!("invalid API base URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("API base URL cannot carry a path: {base_url}"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for the task API")?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn url_for(&self, segments: &[String]) -> Result<reqwest::Url, TransportError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                TransportError::Request(format!("base URL cannot carry a path: {}", self.base_url))
            })?;
            path.pop_if_empty();
            path.extend(segments);
            path.push("");
        }
        Ok(url)
    }

    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Request(error.to_string())
        }
    }
}

impl Transport for HttpTransport {
    #[tracing::instrument(skip(self), fields(method = %request.method, path = %request.path()))]
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.segments)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .header(reqwest::header::ACCEPT, "application/json");

        if let Some(token) = request.bearer.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            let encoded = serde_json::to_string(body)
                .map_err(|err| TransportError::Request(format!("failed to encode body: {err}")))?;
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(encoded);
        }

        let response = builder.send().await.map_err(|error| {
            let classified = self.classify(error);
            warn!(error = %classified, "API request did not complete");
            classified
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|error| self.classify(error))?;
        debug!(status, bytes = body.len(), "API response received");

        Ok(ApiResponse { status, body })
    }
}

/// What a [`ScriptedTransport`] route answers with.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub delay: Option<Duration>,
    pub outcome: Result<ApiResponse, TransportError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// Replays queued responses per route and records every request it sees.
/// A route with nothing queued fails as a connection error.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, method: Method, path: &str, scripted: Scripted) -> &Self {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(scripted);
        self
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<String>) -> &Self {
        self.push(
            method,
            path,
            Scripted {
                delay: None,
                outcome: Ok(ApiResponse::new(status, body)),
            },
        )
    }

    pub fn respond_after(
        &self,
        method: Method,
        path: &str,
        delay: Duration,
        status: u16,
        body: impl Into<String>,
    ) -> &Self {
        self.push(
            method,
            path,
            Scripted {
                delay: Some(delay),
                outcome: Ok(ApiResponse::new(status, body)),
            },
        )
    }

    pub fn fail(&self, method: Method, path: &str, error: TransportError) -> &Self {
        self.push(
            method,
            path,
            Scripted {
                delay: None,
                outcome: Err(error),
            },
        )
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn pending(&self) -> usize {
        self.routes.lock().values().map(VecDeque::len).sum()
    }
}

impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let path = request.path();
        let next = {
            self.log.lock().push(RecordedRequest {
                method: request.method,
                path: path.clone(),
                bearer: request.bearer.clone(),
                body: request.body.clone(),
            });
            let mut routes = self.routes.lock();
            let popped = routes
                .get_mut(&(request.method, path.clone()))
                .and_then(VecDeque::pop_front);
            popped
        };

        let Some(scripted) = next else {
            trace!(method = %request.method, path = %path, "no scripted response");
            return Err(TransportError::Connect(format!(
                "no scripted response for {} {path}",
                request.method
            )));
        };

        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.outcome
    }
}
