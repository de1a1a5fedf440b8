use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::account::{AuthResponse, Identity, LoginCredentials, RefreshRequest, RefreshResponse};
use crate::session_store::SessionStore;
use crate::storage::StorageError;
use crate::transport::{ApiRequest, Transport, TransportError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials (HTTP {status})")]
    InvalidCredentials { status: u16 },

    #[error("authentication request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed authentication response: {0}")]
    MalformedResponse(String),

    #[error("failed to encode authentication request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("not logged in; run `taskdesk login <username>` first")]
pub struct NotAuthenticated;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub identity: Identity,
}

/// The externally observable session states. Refreshing is transient and
/// reported as whichever state it started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    LoggedOut,
    LoggedIn,
}

/// Owns the credential lifecycle: login, logout and access credential
/// refresh against the authentication endpoints.
pub struct SessionManager<T> {
    transport: Arc<T>,
    store: SessionStore,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: Arc<T>, store: SessionStore) -> Self {
        Self {
            transport,
            store,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Presence check only; expiry is discovered through a 401.
    pub fn is_authenticated(&self) -> bool {
        self.store.has_access_token()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated() {
            SessionPhase::LoggedIn
        } else {
            SessionPhase::LoggedOut
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.store.identity()
    }

    pub fn require_session(&self) -> Result<(), NotAuthenticated> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(NotAuthenticated)
        }
    }

    /// Exchanges user credentials for a new session, replacing any prior one.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionInfo, AuthError> {
        let body = serde_json::to_value(LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
        })
        .map_err(AuthError::Encode)?;

        let response = self
            .transport
            .execute(ApiRequest::post(["auth", "login"], body))
            .await
            .inspect_err(|error| warn!(%error, "login request did not complete"))?;

        if !response.is_success() {
            warn!(status = response.status, "login rejected");
            return Err(AuthError::InvalidCredentials {
                status: response.status,
            });
        }

        let auth: AuthResponse = serde_json::from_str(&response.body)
            .map_err(|err| AuthError::MalformedResponse(err.to_string()))?;
        if auth.access.is_empty() || auth.refresh.is_empty() {
            return Err(AuthError::MalformedResponse(
                "empty access or refresh credential".to_string(),
            ));
        }

        let identity = auth.identity();
        self.store
            .write_session(auth.access, auth.refresh, identity.clone())?;

        info!(username = %identity.username(), "logged in");
        Ok(SessionInfo { identity })
    }

    /// Clears the local session unconditionally, then revokes the refresh
    /// credential server-side on a best-effort basis.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) {
        let refresh = self.store.refresh_token();

        if let Err(error) = self.store.clear() {
            warn!(%error, "failed to clear persisted session state");
        }

        if let Some(refresh) = refresh {
            self.revoke(refresh).await;
        } else {
            debug!("no refresh credential to revoke");
        }

        info!("logged out");
    }

    async fn revoke(&self, refresh: String) {
        let body = match serde_json::to_value(RefreshRequest { refresh }) {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "failed to encode logout request");
                return;
            }
        };

        match self
            .transport
            .execute(ApiRequest::post(["auth", "logout"], body))
            .await
        {
            Ok(response) if response.is_success() => {
                debug!("refresh credential revoked");
            }
            Ok(response) => {
                warn!(status = response.status, "server did not accept logout");
            }
            Err(error) => {
                warn!(%error, "logout request failed");
            }
        }
    }

    /// Exchanges the stored refresh credential for a new access credential.
    /// Any failure ends the session and yields `None`.
    pub async fn refresh(&self) -> Option<String> {
        let observed = self.store.access_token();
        self.refresh_rejected(observed.as_deref()).await
    }

    /// Like [`refresh`](Self::refresh), for a caller that saw `rejected`
    /// fail with a 401. If another refresh already replaced that credential
    /// the newer one is returned without a network call.
    #[tracing::instrument(skip_all)]
    pub async fn refresh_rejected(&self, rejected: Option<&str>) -> Option<String> {
        let _gate = self.refresh_gate.lock().await;

        if let Some(current) = self.store.access_token()
            && Some(current.as_str()) != rejected
        {
            debug!("access credential already replaced by a concurrent refresh");
            return Some(current);
        }

        let Some(refresh) = self.store.refresh_token() else {
            info!("no refresh credential available; ending session");
            self.logout().await;
            return None;
        };

        let Some(access) = self.exchange(&refresh).await else {
            self.logout().await;
            return None;
        };

        match self.store.replace_access_token(&refresh, access.clone()) {
            Ok(true) => {
                info!("access credential refreshed");
                Some(access)
            }
            Ok(false) => None,
            Err(error) => {
                warn!(%error, "refreshed access credential kept in memory only");
                Some(access)
            }
        }
    }

    async fn exchange(&self, refresh: &str) -> Option<String> {
        let body = serde_json::to_value(RefreshRequest {
            refresh: refresh.to_string(),
        })
        .inspect_err(|error| warn!(%error, "failed to encode refresh request"))
        .ok()?;

        let response = match self
            .transport
            .execute(ApiRequest::post(["auth", "refresh"], body))
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "refresh request did not complete");
                return None;
            }
        };

        if !response.is_success() {
            warn!(status = response.status, "refresh credential rejected");
            return None;
        }

        match serde_json::from_str::<RefreshResponse>(&response.body) {
            Ok(parsed) if !parsed.access.is_empty() => Some(parsed.access),
            Ok(_) => {
                warn!("refresh response carried an empty access credential");
                None
            }
            Err(error) => {
                warn!(%error, "malformed refresh response");
                None
            }
        }
    }
}

impl<T: Transport + 'static> SessionManager<T> {
    /// Proactively refreshes every `period` while authenticated. The timer
    /// stops when the returned handle is dropped.
    pub fn spawn_refresh_timer(self: &Arc<Self>, period: Duration) -> RefreshTimer {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !manager.is_authenticated() {
                    trace!("refresh timer tick while logged out");
                    continue;
                }
                debug!("proactive access credential refresh");
                if manager.refresh().await.is_none() {
                    info!("proactive refresh ended the session");
                }
            }
        });

        debug!(period_secs = period.as_secs(), "refresh timer started");
        RefreshTimer { handle }
    }
}

#[derive(Debug)]
pub struct RefreshTimer {
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::{Method, ScriptedTransport};

    const LOGIN_BODY: &str = r#"{"access":"a1","refresh":"r1","account":{"id":7,"username":"ivanov","email":"i@example.com","permission":{},"groups":[]},"employee":null}"#;

    fn manager() -> (Arc<ScriptedTransport>, SessionManager<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let manager = SessionManager::new(transport.clone(), SessionStore::in_memory());
        (transport, manager)
    }

    async fn logged_in() -> (Arc<ScriptedTransport>, SessionManager<ScriptedTransport>) {
        let (transport, manager) = manager();
        transport.respond(Method::Post, "/auth/login/", 200, LOGIN_BODY);
        manager.login("ivanov", "secret").await.expect("login");
        (transport, manager)
    }

    #[tokio::test]
    async fn login_stores_session_and_identity() {
        let (transport, manager) = logged_in().await;

        assert!(manager.is_authenticated());
        assert_eq!(manager.phase(), SessionPhase::LoggedIn);
        assert_eq!(manager.access_token().as_deref(), Some("a1"));
        assert_eq!(
            manager.current_identity().as_ref().map(Identity::username),
            Some("ivanov")
        );
        assert_eq!(
            transport.requests()[0].body,
            Some(json!({ "username": "ivanov", "password": "secret" }))
        );
    }

    #[tokio::test]
    async fn rejected_login_is_reported_and_keeps_prior_state() {
        let (transport, manager) = manager();
        transport.respond(Method::Post, "/auth/login/", 401, r#"{"detail":"bad"}"#);

        let err = manager.login("ivanov", "wrong").await.expect_err("must fail");
        assert!(matches!(err, AuthError::InvalidCredentials { status: 401 }));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.require_session(), Err(NotAuthenticated));
    }

    #[tokio::test]
    async fn malformed_login_response_is_an_error() {
        let (transport, manager) = manager();
        transport.respond(Method::Post, "/auth/login/", 200, "<html>");

        let err = manager.login("ivanov", "secret").await.expect_err("must fail");
        assert!(matches!(err, AuthError::MalformedResponse(_)));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn logout_clears_even_when_revoke_fails() {
        let (transport, manager) = logged_in().await;
        transport.fail(
            Method::Post,
            "/auth/logout/",
            TransportError::Timeout(5000),
        );

        manager.logout().await;

        assert!(!manager.is_authenticated());
        assert!(manager.current_identity().is_none());
        assert_eq!(transport.count(Method::Post, "/auth/logout/"), 1);
        assert_eq!(
            transport.requests()[1].body,
            Some(json!({ "refresh": "r1" }))
        );
    }

    #[tokio::test]
    async fn refresh_success_replaces_access_only() {
        let (transport, manager) = logged_in().await;
        transport.respond(Method::Post, "/auth/refresh/", 200, r#"{"access":"a2"}"#);

        assert_eq!(manager.refresh().await.as_deref(), Some("a2"));
        assert_eq!(manager.access_token().as_deref(), Some("a2"));
        assert_eq!(manager.store().refresh_token().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn refresh_failure_logs_out() {
        let (transport, manager) = logged_in().await;
        transport
            .respond(Method::Post, "/auth/refresh/", 401, "")
            .respond(Method::Post, "/auth/logout/", 200, "");

        assert_eq!(manager.refresh().await, None);
        assert!(!manager.is_authenticated());
        assert_eq!(transport.count(Method::Post, "/auth/refresh/"), 1);
    }

    #[tokio::test]
    async fn refresh_without_refresh_credential_logs_out_without_network() {
        let (transport, manager) = manager();

        assert_eq!(manager.refresh().await, None);
        assert!(!manager.is_authenticated());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_exchange() {
        let (transport, manager) = logged_in().await;
        transport.respond_after(
            Method::Post,
            "/auth/refresh/",
            Duration::from_millis(50),
            200,
            r#"{"access":"a2"}"#,
        );

        let (first, second) = tokio::join!(manager.refresh(), manager.refresh());

        assert_eq!(first.as_deref(), Some("a2"));
        assert_eq!(second.as_deref(), Some("a2"));
        assert_eq!(transport.count(Method::Post, "/auth/refresh/"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_refresh_is_not_undone() {
        let (transport, manager) = logged_in().await;
        transport
            .respond_after(
                Method::Post,
                "/auth/refresh/",
                Duration::from_millis(50),
                200,
                r#"{"access":"a2"}"#,
            )
            .respond(Method::Post, "/auth/logout/", 200, "");

        let (refreshed, ()) = tokio::join!(manager.refresh(), manager.logout());

        assert_eq!(refreshed, None);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timer_refreshes_while_logged_in() {
        let (transport, manager) = logged_in().await;
        transport.respond(Method::Post, "/auth/refresh/", 200, r#"{"access":"a2"}"#);
        let manager = Arc::new(manager);

        let timer = manager.spawn_refresh_timer(Duration::from_secs(240));
        tokio::time::sleep(Duration::from_secs(239)).await;
        assert_eq!(transport.count(Method::Post, "/auth/refresh/"), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.count(Method::Post, "/auth/refresh/"), 1);
        assert_eq!(manager.access_token().as_deref(), Some("a2"));

        timer.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.count(Method::Post, "/auth/refresh/"), 1);
    }
}
