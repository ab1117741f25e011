//! The [`AuthManager`] trait: validation of user identity tokens presented
//! at session activation.

use std::fmt::Debug;

use async_trait::async_trait;

use uasc_crypto::Thumbprint;
use uasc_types::{Error, StatusCode};

use crate::config::ServerEndpoint;

/// Debug-safe wrapper around a password.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Password").field(&"****").finish()
    }
}

impl Password {
    /// Create a new debug-safe password.
    pub fn new(password: String) -> Self {
        Self(password)
    }

    /// Get the inner value. Note: you should make sure not to log this!
    pub fn get(&self) -> &str {
        &self.0
    }
}

/// The token shared by all anonymous users.
pub const ANONYMOUS_USER_TOKEN: &str = "anonymous";

/// A unique identifier for a _user_. Distinct from a client or session: a
/// user can have multiple sessions at the same time, and is the value access
/// decisions key on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserToken(pub String);

impl UserToken {
    /// `true` if this is the shared anonymous user token.
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_USER_TOKEN
    }
}

/// Validates user credentials and maps them to user tokens. Two sessions
/// presenting credentials that map to the same token are the _same_ user.
#[allow(unused_variables)]
#[async_trait]
pub trait AuthManager: Send + Sync + 'static {
    /// Validate whether an anonymous user is allowed to access the given
    /// endpoint. All anonymous users share one special token.
    async fn authenticate_anonymous_token(&self, endpoint: &ServerEndpoint) -> Result<(), Error> {
        Err(Error::new(
            StatusCode::BadIdentityTokenRejected,
            "Anonymous identity token unsupported",
        ))
    }

    /// Validate the given username and password for `endpoint`, returning
    /// the token of the authenticated user.
    async fn authenticate_username_identity_token(
        &self,
        endpoint: &ServerEndpoint,
        username: &str,
        password: &Password,
    ) -> Result<UserToken, Error> {
        Err(Error::new(
            StatusCode::BadIdentityTokenRejected,
            "Username identity token unsupported",
        ))
    }

    /// Validate a user certificate by its thumbprint. The signature over the
    /// server's certificate and nonce has already been verified when this is
    /// called.
    async fn authenticate_x509_identity_token(
        &self,
        endpoint: &ServerEndpoint,
        signing_thumbprint: &Thumbprint,
    ) -> Result<UserToken, Error> {
        Err(Error::new(
            StatusCode::BadIdentityTokenRejected,
            "X509 identity token unsupported",
        ))
    }
}

/// An authenticator that accepts anonymous users and nothing else.
#[derive(Debug, Default)]
pub struct DefaultAuthenticator;

#[async_trait]
impl AuthManager for DefaultAuthenticator {
    async fn authenticate_anonymous_token(&self, _endpoint: &ServerEndpoint) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Password;

    #[test]
    fn password_debug_is_masked() {
        let password = Password::new("hunter2".to_string());
        assert!(!format!("{:?}", password).contains("hunter2"));
        assert_eq!(password.get(), "hunter2");
    }
}
