//! Server-issued login sessions.
//!
//! Sessions are created at a successful OAuth2 callback and persisted as a
//! JSON map in the data directory, so logins survive a restart. Mutations
//! rewrite the backing file under the store lock, making create, extend
//! and delete atomic at record granularity.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use smallweb_common::SessionId;

use crate::errors::ServerError;

/// Lifetime of a fresh or extended session
pub fn session_ttl() -> Duration {
    Duration::days(14)
}

/// A session within this window of its expiry is extended on use
pub fn extension_window() -> Duration {
    Duration::days(7)
}

/// A login session bound to the host it was created on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub email: String,
    /// The request host this session was created for; presented hosts
    /// must match exactly, defending against cross-host cookie replay
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session has passed its expiry.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the session is close enough to expiry to warrant extension.
    pub fn near_expiry(&self, now: DateTime<Utc>) -> bool {
        now + extension_window() >= self.expires_at
    }
}

/// File-backed session store.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Open the store at `path`, loading any persisted sessions.
    ///
    /// # Errors
    ///
    /// Fails when the parent directory cannot be created or an existing
    /// file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let sessions = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(ServerError::Serialize)?
        } else {
            HashMap::new()
        };

        debug!(path = %path.display(), count = sessions.len(), "Opened session store");
        Ok(Self {
            path,
            sessions: Mutex::new(sessions),
        })
    }

    /// Create a session for `email` on `domain`, valid for the full TTL.
    pub fn create(&self, email: &str, domain: &str) -> Result<SessionId, ServerError> {
        let now = Utc::now();
        let session = Session {
            id: SessionId::new(),
            email: email.to_string(),
            domain: domain.to_string(),
            created_at: now,
            expires_at: now + session_ttl(),
        };
        let id = session.id.clone();

        let mut sessions = self.sessions.lock();
        sessions.insert(id.as_str().to_string(), session);
        self.persist(&sessions)?;

        info!(email = %email, domain = %domain, "Created session");
        Ok(id)
    }

    /// Fetch a session by id, requiring the presented host to match the
    /// stored domain. Expiry is the caller's concern.
    pub fn get(&self, id: &SessionId, domain: &str) -> Option<Session> {
        let sessions = self.sessions.lock();
        let session = sessions.get(id.as_str())?;
        if session.domain != domain {
            return None;
        }
        Some(session.clone())
    }

    /// Move a session's expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SessionNotFound`] for an unknown id.
    pub fn extend(&self, id: &SessionId, expires_at: DateTime<Utc>) -> Result<(), ServerError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id.as_str())
            .ok_or(ServerError::SessionNotFound)?;
        session.expires_at = expires_at;
        self.persist(&sessions)
    }

    /// Delete a session. Deleting an unknown id is not an error.
    pub fn delete(&self, id: &SessionId) -> Result<(), ServerError> {
        let mut sessions = self.sessions.lock();
        if sessions.remove(id.as_str()).is_some() {
            self.persist(&sessions)?;
        }
        Ok(())
    }

    fn persist(&self, sessions: &HashMap<String, Session>) -> Result<(), ServerError> {
        let content = serde_json::to_string_pretty(sessions).map_err(ServerError::Serialize)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
