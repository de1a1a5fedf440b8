use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::placeholder::placeholder_tasks;
use crate::session::SessionManager;
use crate::task::{Task, normalize_collection};
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// What `fetch_tasks` returns when the collection cannot be loaded for any
/// reason other than an unrecoverable 401.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    #[default]
    Empty,
    Placeholder,
}

impl FromStr for FallbackPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "empty" | "none" => Ok(Self::Empty),
            "placeholder" | "mock" => Ok(Self::Placeholder),
            other => Err(anyhow!("unknown fallback policy '{other}' (expected empty or placeholder)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The request stayed unauthorized after the single refresh-and-retry,
    /// or the refresh itself failed and ended the session.
    #[error("session expired; log in again")]
    Unauthorized,
}

/// Position in the refresh-and-retry protocol. A request moves from
/// `First` to `Retry` at most once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

enum Fetched {
    Response(ApiResponse),
    Unreachable(TransportError),
}

/// Read access to the task endpoints, authorized by the session.
pub struct TaskGateway<T> {
    session: Arc<SessionManager<T>>,
    fallback: FallbackPolicy,
}

impl<T: Transport> TaskGateway<T> {
    pub fn new(session: Arc<SessionManager<T>>, fallback: FallbackPolicy) -> Self {
        Self { session, fallback }
    }

    pub fn session(&self) -> &Arc<SessionManager<T>> {
        &self.session
    }

    /// Loads the task collection. Connectivity failures, error statuses and
    /// undecodable bodies degrade to the fallback collection; only an
    /// unrecoverable 401 is an error.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_tasks(&self) -> Result<Vec<Task>, GatewayError> {
        let response = match self.authorized_get(&["todo", "todos"]).await? {
            Fetched::Response(response) => response,
            Fetched::Unreachable(error) => {
                warn!(%error, "task collection unreachable; using fallback");
                return Ok(self.fallback_tasks());
            }
        };

        if !response.is_success() {
            warn!(status = response.status, "task collection request failed; using fallback");
            return Ok(self.fallback_tasks());
        }

        let decoded = response
            .json()
            .inspect_err(|error| warn!(%error, "task collection body is not JSON"))
            .ok()
            .and_then(|value| normalize_collection(&value));

        match decoded {
            Some(tasks) => {
                info!(count = tasks.len(), "fetched task collection");
                Ok(tasks)
            }
            None => Ok(self.fallback_tasks()),
        }
    }

    /// Loads one task. Absence and any recoverable failure yield `None`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_task_by_id(&self, id: &str) -> Result<Option<Task>, GatewayError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }

        let response = match self.authorized_get(&["todo", "todos", id]).await? {
            Fetched::Response(response) => response,
            Fetched::Unreachable(error) => {
                warn!(%error, "task unreachable; reporting as not found");
                return Ok(None);
            }
        };

        if response.status == 404 {
            debug!("task not found");
            return Ok(None);
        }
        if !response.is_success() {
            warn!(status = response.status, "task request failed; reporting as not found");
            return Ok(None);
        }

        let task = response
            .json()
            .inspect_err(|error| warn!(%error, "task body is not JSON"))
            .ok()
            .and_then(|value| Task::from_wire(&value));
        Ok(task)
    }

    async fn authorized_get(&self, segments: &[&str]) -> Result<Fetched, GatewayError> {
        let mut attempt = Attempt::First;
        let mut token = self.session.access_token();

        loop {
            let request = ApiRequest::get(segments.iter().copied()).with_bearer(token.clone());
            let response = match self.session.transport().execute(request).await {
                Ok(response) => response,
                Err(error) => return Ok(Fetched::Unreachable(error)),
            };

            if !response.is_unauthorized() {
                return Ok(Fetched::Response(response));
            }

            attempt = match attempt {
                Attempt::First => {
                    debug!("request unauthorized; refreshing access credential");
                    match self.session.refresh_rejected(token.as_deref()).await {
                        Some(fresh) => {
                            token = Some(fresh);
                            Attempt::Retry
                        }
                        None => {
                            warn!("refresh failed; request stays unauthorized");
                            return Err(GatewayError::Unauthorized);
                        }
                    }
                }
                Attempt::Retry => {
                    warn!("retried request rejected again");
                    return Err(GatewayError::Unauthorized);
                }
            };
        }
    }

    fn fallback_tasks(&self) -> Vec<Task> {
        match self.fallback {
            FallbackPolicy::Empty => vec![],
            FallbackPolicy::Placeholder => placeholder_tasks(),
        }
    }
}
