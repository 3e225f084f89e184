//! Authentication seam for the connection handshake.
//!
//! Credentials are issued by an external auth service and validated once,
//! at connection-open time. The realtime layer never refreshes or inspects
//! them afterwards.

use async_trait::async_trait;
use beacon_protocol::UserId;
use thiserror::Error;

/// Handshake authentication errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Missing credential")]
    MissingToken,

    /// The credential is unknown or malformed.
    #[error("Invalid credential")]
    InvalidToken,

    /// The credential was valid once but has expired.
    #[error("Expired credential")]
    Expired,

    /// The auth service could not be reached.
    #[error("Auth service unavailable: {0}")]
    Unavailable(String),
}

/// Validates bearer credentials at connection-open time.
///
/// A failed validation means no connection object is ever created; the
/// caller is rejected before any registration side effects run.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a bearer token to the owning user.
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

pub mod testing {
    //! Static-map authenticator for tests and local development.

    use super::*;
    use std::collections::HashMap;

    /// Authenticator backed by a fixed token -> user table.
    #[derive(Debug, Default)]
    pub struct StaticAuthenticator {
        tokens: HashMap<String, UserId>,
    }

    impl StaticAuthenticator {
        /// Build from (token, user) pairs.
        #[must_use]
        pub fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                tokens: pairs
                    .iter()
                    .map(|(token, user)| (token.to_string(), user.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
            if token.is_empty() {
                return Err(AuthError::MissingToken);
            }
            self.tokens
                .get(token)
                .cloned()
                .ok_or(AuthError::InvalidToken)
        }
    }
}
