//! Error types for the auth use cases.

use event_streamer::StreamError;
use thiserror::Error;

/// Result type alias for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No user matches the lookup.
    #[error("user not found: {0}")]
    NotFound(String),

    /// A user with that username already exists.
    #[error("username already taken: {0}")]
    Conflict(String),

    /// The backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned by sign-up and login.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Login for a username nobody signed up with.
    #[error("User '{0}' does not exist")]
    UserNotFound(String),

    /// Login with a password that does not match the stored hash.
    #[error("Wrong password")]
    WrongPassword,

    /// Sign-up with a username that is already in use.
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// Rejected sign-up input.
    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("Password hashing error: {0}")]
    Hashing(String),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The user was stored but the sign-up event could not be published.
    #[error("Failed to publish user event: {0}")]
    Publish(#[from] StreamError),
}
