//! Login, registration and logout
//!
//! Forms are checked locally first. A form that fails validation never
//! reaches the server, and its error carries the inline message to show.

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::models::{LoginRequest, RegisterRequest, User};
use crate::session::SessionStore;
use crate::validation::{validate_login, validate_registration};

/// Auth flows on top of the API client and the token store
#[derive(Clone)]
pub struct Authenticator {
    api: ApiClient,
    session: SessionStore,
}

impl Authenticator {
    pub fn new(api: ApiClient) -> Self {
        let session = api.session().clone();
        Self { api, session }
    }

    /// Log in with a username or email.
    ///
    /// # Arguments
    /// * `login` - Username or email address
    /// * `password` - Plain password, sent only over the login call
    ///
    /// # Returns
    /// * `Result<User>` - The signed-in user; the token is stored in the session
    ///
    /// # Errors
    /// Empty fields yield `ValidationError::MissingCredentials` without a
    /// request. A rejected login carries the server's message, or
    /// "Login failed".
    pub async fn login(&self, login: &str, password: &str) -> Result<User> {
        let form = LoginRequest {
            login: login.trim().to_string(),
            password: password.to_string(),
        };
        validate_login(&form)?;

        let reply = self.api.login(&form.login, &form.password).await?;
        match reply.user {
            Some(user) => Ok(user),
            // Older servers return only the token.
            None => self.api.current_user().await,
        }
    }

    /// Create an account; returns the server's confirmation message.
    ///
    /// Registration does not sign the user in.
    pub async fn register(&self, form: &RegisterRequest) -> Result<String> {
        let form = RegisterRequest {
            username: form.username.trim().to_string(),
            email: form.email.trim().to_string(),
            full_name: form.full_name.trim().to_string(),
            password: form.password.clone(),
        };
        validate_registration(&form)?;

        let reply = self.api.register(&form).await?;
        log::info!("Registered {}", form.username);
        Ok(reply.message)
    }

    /// Drop the session token.
    ///
    /// The server is told first, but only a local storage failure is an
    /// error: the token is gone either way.
    pub async fn logout(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            return Ok(());
        }
        match self.api.logout().await {
            Ok(()) => {}
            Err(ClientError::Storage(e)) => return Err(e.into()),
            Err(e) => log::warn!("Logout request failed: {}", e),
        }
        log::info!("Logged out");
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User> {
        self.api.current_user().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::ValidationError;

    // Nothing listens on port 9; reaching the network would fail with a
    // transport error rather than a validation error.
    fn authenticator() -> Authenticator {
        let api = ApiClient::new(
            &ClientConfig::new("http://127.0.0.1:9"),
            SessionStore::in_memory(),
        )
        .unwrap();
        Authenticator::new(api)
    }

    #[tokio::test]
    async fn blank_login_is_rejected_locally() {
        let auth = authenticator();
        let err = auth.login("  ", "secret").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::MissingCredentials)
        ));
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn short_password_is_rejected_locally() {
        let auth = authenticator();
        let form = RegisterRequest {
            username: "ana".into(),
            email: "ana@example.com".into(),
            full_name: String::new(),
            password: "12345".into(),
        };
        let err = auth.register(&form).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::PasswordTooShort)
        ));
    }

    #[tokio::test]
    async fn logout_clears_token_even_if_server_is_down() {
        let auth = authenticator();
        auth.session.set("stale-token").unwrap();
        assert!(auth.is_authenticated());

        auth.logout().await.unwrap();
        assert!(!auth.is_authenticated());
    }
}
