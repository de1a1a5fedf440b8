use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::account::Identity;
use crate::storage::{KeyValueStore, MemoryKeyValueStore, StorageError};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user_data";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

#[derive(Clone, Default)]
struct Credentials {
    access: Option<String>,
    refresh: Option<String>,
    identity: Option<Identity>,
}

/// Credential pair and identity record, cached in memory and mirrored to a
/// persistent [`KeyValueStore`].
///
/// The in-memory copy is authoritative for reads. Writes go to the backend
/// first so a failed write leaves the previous session intact; clearing
/// drops the in-memory copy first so a failed write can never keep a
/// session alive.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
    state: Arc<Mutex<Credentials>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionStore")
            .field("has_access", &state.access.is_some())
            .field("has_refresh", &state.refresh.is_some())
            .field("username", &state.identity.as_ref().map(Identity::username))
            .finish()
    }
}

impl SessionStore {
    #[tracing::instrument(skip(backend))]
    pub fn load(backend: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let access = backend.get(ACCESS_TOKEN_KEY)?.filter(|v| !v.is_empty());
        let refresh = backend.get(REFRESH_TOKEN_KEY)?.filter(|v| !v.is_empty());
        let identity = match backend.get(USER_KEY)? {
            Some(raw) => match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => Some(identity),
                Err(error) => {
                    warn!(%error, "stored identity record is unreadable; ignoring it");
                    None
                }
            },
            None => None,
        };

        debug!(
            has_access = access.is_some(),
            has_refresh = refresh.is_some(),
            has_identity = identity.is_some(),
            "loaded session state"
        );

        Ok(Self {
            backend,
            state: Arc::new(Mutex::new(Credentials {
                access,
                refresh,
                identity,
            })),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryKeyValueStore::new()),
            state: Arc::new(Mutex::new(Credentials::default())),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.lock().refresh.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    pub fn has_access_token(&self) -> bool {
        self.state.lock().access.is_some()
    }

    /// Replaces the whole session.
    pub fn write_session(
        &self,
        access: String,
        refresh: String,
        identity: Identity,
    ) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(&identity)?;
        let mut state = self.state.lock();
        self.backend.set_many(&[
            (ACCESS_TOKEN_KEY, access.clone()),
            (REFRESH_TOKEN_KEY, refresh.clone()),
            (USER_KEY, serialized),
        ])?;
        *state = Credentials {
            access: Some(access),
            refresh: Some(refresh),
            identity: Some(identity),
        };
        Ok(())
    }

    /// Stores a freshly exchanged access credential, but only while
    /// `exchanged_refresh` is still the stored refresh credential. Returns
    /// `false` when the session changed underneath (logout or re-login).
    pub fn replace_access_token(
        &self,
        exchanged_refresh: &str,
        access: String,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        if state.refresh.as_deref() != Some(exchanged_refresh) {
            debug!("refresh credential changed during exchange; discarding new access credential");
            return Ok(false);
        }
        self.backend.set_many(&[(ACCESS_TOKEN_KEY, access.clone())])?;
        state.access = Some(access);
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        {
            let mut state = self.state.lock();
            *state = Credentials::default();
        }
        self.backend.remove_many(&SESSION_KEYS)
    }
}
