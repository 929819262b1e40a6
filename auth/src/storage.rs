//! Persistence boundary for user accounts.

use crate::error::StorageError;
use crate::user::User;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Where user accounts live.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores a new user and returns it with its assigned ID.
    async fn create_user(&self, user: User) -> Result<User, StorageError>;

    /// Looks a user up by username. Unknown usernames are
    /// [`StorageError::NotFound`].
    async fn find_user(&self, username: &str) -> Result<User, StorageError>;
}

#[derive(Debug, Default)]
struct Accounts {
    users: HashMap<i64, User>,
    next_id: i64,
}

/// Process-local [`Storage`].
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    accounts: RwLock<Accounts>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a user by ID.
    pub async fn delete_user(&self, id: i64) -> Result<(), StorageError> {
        match self.accounts.write().await.users.remove(&id) {
            Some(user) => {
                debug!("Deleted user '{}' ({})", user.username, id);
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("id {}", id))),
        }
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_user(&self, mut user: User) -> Result<User, StorageError> {
        let mut accounts = self.accounts.write().await;
        if accounts
            .users
            .values()
            .any(|existing| existing.username == user.username)
        {
            return Err(StorageError::Conflict(user.username));
        }
        accounts.next_id += 1;
        user.id = accounts.next_id;
        accounts.users.insert(user.id, user.clone());
        debug!("Stored user '{}' with id {}", user.username, user.id);
        Ok(user)
    }

    async fn find_user(&self, username: &str) -> Result<User, StorageError> {
        self.accounts
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(username.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str) -> User {
        User {
            id: 0,
            email: format!("{}@example.com", username),
            username: username.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn created_user_can_be_found() {
        let storage = InMemoryStorage::new();
        let created = storage.create_user(user("ada")).await.unwrap();
        assert_ne!(created.id, 0);

        let found = storage.find_user("ada").await.unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage
            .find_user("username-that-does-not-exist")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let storage = InMemoryStorage::new();
        storage.create_user(user("ada")).await.unwrap();
        let err = storage.create_user(user("ada")).await.unwrap_err();
        assert_eq!(err, StorageError::Conflict("ada".to_string()));
    }

    #[tokio::test]
    async fn deleted_user_is_gone() {
        let storage = InMemoryStorage::new();
        let created = storage.create_user(user("ada")).await.unwrap();
        storage.delete_user(created.id).await.unwrap();
        assert!(storage.is_empty().await);
        assert!(storage.find_user("ada").await.is_err());
        assert!(storage.delete_user(created.id).await.is_err());
    }
}
