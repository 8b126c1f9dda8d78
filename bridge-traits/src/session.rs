//! Catalog Session Abstraction
//!
//! The engine never logs in to the remote catalog itself. The host owns the
//! session lifecycle and exposes active sessions through [`SessionProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a catalog user, as assigned by the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An authenticated session with the remote catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSession {
    /// Host-side session identifier (opaque to the engine)
    pub session_id: String,
    /// The catalog user this session belongs to
    pub user_id: UserId,
    /// Whether the session is still logged in
    pub logged_in: bool,
}

impl CatalogSession {
    pub fn new(session_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            logged_in: true,
        }
    }

    /// A session is usable only while it is logged in
    pub fn is_authenticated(&self) -> bool {
        self.logged_in
    }
}

/// Session lookup capability
///
/// Queried by user id on every cycle, so a session that expires between two
/// cycles is observed by the next one.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Return the active session for `user_id`, if any
    async fn session_for(&self, user_id: &UserId) -> Option<CatalogSession>;

    /// Return an authenticated session for `user_id`, if any
    async fn authenticated_session(&self, user_id: &UserId) -> Option<CatalogSession> {
        self.session_for(user_id)
            .await
            .filter(CatalogSession::is_authenticated)
    }
}
