//! Sign-up and login.

use crate::config::AuthConfig;
use crate::error::{AuthError, Result, StorageError};
use crate::password::PasswordHasher;
use crate::storage::Storage;
use crate::token::{Claims, TokenIssuer};
use crate::user::{NewUser, User};
use event_messages::{Payload, UserEvent};
use event_streamer::Publisher;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The auth use cases.
///
/// Every successful sign-up is announced on the user event stream with the
/// new user's ID as subject and their public profile as payload.
pub struct AuthService {
    storage: Arc<dyn Storage>,
    events: Publisher<UserEvent>,
    hasher: PasswordHasher,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        storage: Arc<dyn Storage>,
        events: Publisher<UserEvent>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            events,
            hasher: PasswordHasher::new(config.hash_cost)?,
            tokens: TokenIssuer::new(config.jwt_secret.as_bytes(), config.token_ttl),
        })
    }

    /// Registers a user and publishes a [`UserEvent`] for them.
    ///
    /// # Errors
    ///
    /// [`AuthError::UsernameTaken`] when the username exists already. If the
    /// event cannot be published the user stays stored and
    /// [`AuthError::Publish`] is returned.
    pub async fn sign_up(&self, new_user: NewUser) -> Result<User> {
        if new_user.username.is_empty() {
            return Err(AuthError::InvalidUser("username must not be empty".into()));
        }
        if new_user.password.is_empty() {
            return Err(AuthError::InvalidUser("password must not be empty".into()));
        }

        let password_hash = self.hasher.hash(&new_user.password)?;
        let user = self
            .storage
            .create_user(User {
                id: 0,
                email: new_user.email,
                username: new_user.username,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                StorageError::Conflict(username) => AuthError::UsernameTaken(username),
                other => AuthError::Storage(other),
            })?;
        info!("Signed up user '{}' with id {}", user.username, user.id);

        let payload = Payload::from_json(&user.profile())
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        if let Err(e) = self.events.publish(UserEvent::new(user.id, payload)).await {
            error!("Failed to announce user {}: {}", user.id, e);
            return Err(e.into());
        }
        Ok(user)
    }

    /// Checks credentials and returns a signed token for the user.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let user = match self.storage.find_user(username).await {
            Ok(user) => user,
            Err(StorageError::NotFound(_)) => {
                warn!("Login for unknown user '{}'", username);
                return Err(AuthError::UserNotFound(username.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !self.hasher.verify(password, &user.password_hash)? {
            warn!("Wrong password for user '{}'", username);
            return Err(AuthError::WrongPassword);
        }

        info!("User '{}' logged in", username);
        self.tokens.issue(user.id)
    }

    /// Verifies a token issued by [`login`](Self::login).
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        self.tokens.verify(token)
    }
}
