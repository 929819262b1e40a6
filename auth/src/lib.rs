//! Sign-up and login for user accounts.
//!
//! Accounts are persisted through a [`Storage`] implementation. Passwords are
//! hashed with argon2id and logins are answered with HS256 tokens. Each
//! sign-up publishes a `UserEvent` on the event stream so search ingestion
//! and the social graph builder learn about new users.

mod config;
mod error;
mod password;
mod service;
mod storage;
mod token;
mod user;

pub use config::AuthConfig;
pub use error::{AuthError, Result, StorageError};
pub use password::{HashCost, PasswordHasher};
pub use service::AuthService;
pub use storage::{InMemoryStorage, Storage};
pub use token::{Claims, TokenIssuer};
pub use user::{NewUser, User, UserProfile};
