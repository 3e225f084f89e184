//! Session credential table.
//!
//! The platform auth service is the issuer of bearer credentials; this
//! server only checks membership. Sessions are announced and revoked over
//! the internal HTTP surface (`/internal/sessions`), the same trust
//! boundary the message store uses for relay, so no outbound call is
//! needed at handshake time.

use async_trait::async_trait;
use beacon_core::{AuthError, Authenticator};
use beacon_protocol::UserId;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

/// Known-good bearer tokens and their owning users.
#[derive(Debug, Default)]
pub struct SessionTable {
    tokens: DashMap<String, UserId>,
}

/// One session announcement from the auth service.
#[derive(Debug, Deserialize)]
pub struct SessionEntry {
    /// Bearer token as presented by the client.
    pub token: String,
    /// Owning user.
    pub user_id: UserId,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a session. Re-announcing a token updates its owner.
    pub fn insert(&self, token: impl Into<String>, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        debug!(user = %user_id, "Session announced");
        self.tokens.insert(token.into(), user_id);
    }

    /// Revoke a session. Open connections are unaffected; credentials are
    /// checked at connection-open time only.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Preload sessions from a TOML file mapping token to user id.
    ///
    /// Intended for development and tests; in production the auth service
    /// announces sessions over the internal endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn preload_from_file(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<usize> {
        use anyhow::Context;

        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sessions file: {}", path.display()))?;
        let entries: std::collections::HashMap<String, String> = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse sessions file: {}", path.display()))?;

        let count = entries.len();
        for (token, user_id) in entries {
            self.insert(token, user_id);
        }
        Ok(count)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no session is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for SessionTable {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens
            .get(token)
            .map(|user| user.clone())
            .ok_or(AuthError::InvalidToken)
    }
}
