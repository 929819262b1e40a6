use serde::{Deserialize, Serialize};

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Assigned by storage; zero until the user is created.
    pub id: i64,
    pub email: String,
    pub username: String,
    /// PHC-formatted argon2 hash.
    pub password_hash: String,
}

impl User {
    /// The part of the account other services may see.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
        }
    }
}

/// Public view of a user, carried as the payload of sign-up events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Username")]
    pub username: String,
}

/// Sign-up request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl NewUser {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}
