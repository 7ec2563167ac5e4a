//! Auth session storage.
//!
//! The session holds the access and refresh tokens. Stores are read
//! synchronously by the request interceptor, so every operation here is a
//! short, non-blocking critical section.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Key under which the access token is persisted.
pub const ACCESS_TOKEN_KEY: &str = "token";

/// Key under which the refresh token is persisted.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Snapshot of the current credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    #[serde(
        rename = "token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<String>,

    #[serde(
        rename = "refreshToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,
}

impl AuthSession {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    fn apply(&mut self, access_token: &str, refresh_token: Option<&str>) {
        self.access_token = Some(access_token.to_string());
        if let Some(refresh) = refresh_token {
            self.refresh_token = Some(refresh.to_string());
        }
    }
}

/// Storage for the auth session.
///
/// Implementations must be cheap to call from synchronous code.
pub trait SessionStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    /// Store a new access token. A `None` refresh token keeps the stored one.
    fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>);

    /// Forget both tokens.
    fn clear(&self);

    fn snapshot(&self) -> AuthSession {
        AuthSession {
            access_token: self.access_token(),
            refresh_token: self.refresh_token(),
        }
    }

    fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: RwLock<AuthSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that starts out with the given tokens.
    pub fn with_tokens(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            session: RwLock::new(AuthSession {
                access_token: Some(access_token.into()),
                refresh_token,
            }),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn access_token(&self) -> Option<String> {
        read(&self.session).access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.session).refresh_token.clone()
    }

    fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        write(&self.session).apply(access_token, refresh_token);
    }

    fn clear(&self) {
        *write(&self.session) = AuthSession::default();
    }

    fn snapshot(&self) -> AuthSession {
        read(&self.session).clone()
    }
}

/// Session store persisted to a JSON file.
///
/// The file holds an object with the keys [`ACCESS_TOKEN_KEY`] and
/// [`REFRESH_TOKEN_KEY`]; a missing key means the token is absent.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    session: RwLock<AuthSession>,
}

impl FileSessionStore {
    /// Open the store, loading any session already saved at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let session = match std::fs::read(&path) {
            Ok(contents) if contents.iter().all(u8::is_ascii_whitespace) => AuthSession::default(),
            Ok(contents) => serde_json::from_slice(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AuthSession::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(
            path = %path.display(),
            authenticated = session.is_authenticated(),
            "Loaded session"
        );

        Ok(Self {
            path,
            session: RwLock::new(session),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, session: &AuthSession) {
        if let Err(e) = write_session_file(&self.path, session) {
            warn!(path = %self.path.display(), error = %e, "Failed to persist session");
        }
    }
}

impl SessionStore for FileSessionStore {
    fn access_token(&self) -> Option<String> {
        read(&self.session).access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.session).refresh_token.clone()
    }

    fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        let mut session = write(&self.session);
        session.apply(access_token, refresh_token);
        self.persist(&session);
    }

    fn clear(&self) {
        let mut session = write(&self.session);
        *session = AuthSession::default();
        self.persist(&session);
    }

    fn snapshot(&self) -> AuthSession {
        read(&self.session).clone()
    }
}

fn write_session_file(path: &Path, session: &AuthSession) -> Result<(), SessionError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_vec_pretty(session)?;
    std::fs::write(path, contents)?;
    Ok(())
}

fn read(lock: &RwLock<AuthSession>) -> std::sync::RwLockReadGuard<'_, AuthSession> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(lock: &RwLock<AuthSession>) -> std::sync::RwLockWriteGuard<'_, AuthSession> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
