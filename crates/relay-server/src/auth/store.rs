//! Credential storage.
//!
//! Handlers only see the [`CredentialStore`] trait. The in-memory store is
//! what the server ships with; a database-backed store slots in behind the
//! same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub phonenumber: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

/// Fields for a user that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub phonenumber: String,
    pub password_hash: String,
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique field is already taken.
    #[error("A user with this {0} already exists")]
    Duplicate(&'static str),
}

/// Persistence for user credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create a user, assigning it an id.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Find a user by phone number.
    async fn find_by_phonenumber(&self, phonenumber: &str) -> Result<Option<User>, StoreError>;
}

#[derive(Debug, Default)]
struct Users {
    by_id: HashMap<String, User>,
    /// phonenumber -> id
    by_phonenumber: HashMap<String, String>,
    /// email -> id
    by_email: HashMap<String, String>,
}

/// Credential store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<Users>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;

        if users.by_phonenumber.contains_key(&user.phonenumber) {
            return Err(StoreError::Duplicate("phonenumber"));
        }
        if users.by_email.contains_key(&user.email) {
            return Err(StoreError::Duplicate("email"));
        }

        let created = User {
            id: Uuid::new_v4().to_string(),
            email: user.email,
            phonenumber: user.phonenumber,
            password_hash: user.password_hash,
        };

        users
            .by_phonenumber
            .insert(created.phonenumber.clone(), created.id.clone());
        users
            .by_email
            .insert(created.email.clone(), created.id.clone());
        users.by_id.insert(created.id.clone(), created.clone());

        Ok(created)
    }

    async fn find_by_phonenumber(&self, phonenumber: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .by_phonenumber
            .get(phonenumber)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, phonenumber: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            phonenumber: phonenumber.to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryCredentialStore::new();

        let created = store
            .create_user(new_user("a@example.com", "555-0100"))
            .await
            .unwrap();
        assert!(!created.id.is_empty());

        let found = store.find_by_phonenumber("555-0100").await.unwrap();
        assert_eq!(found, Some(created));
        assert!(store.find_by_phonenumber("555-0199").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_fields() {
        let store = InMemoryCredentialStore::new();
        store
            .create_user(new_user("a@example.com", "555-0100"))
            .await
            .unwrap();

        assert!(matches!(
            store.create_user(new_user("b@example.com", "555-0100")).await,
            Err(StoreError::Duplicate("phonenumber"))
        ));
        assert!(matches!(
            store.create_user(new_user("a@example.com", "555-0101")).await,
            Err(StoreError::Duplicate("email"))
        ));
        assert!(store.find_by_phonenumber("555-0101").await.unwrap().is_none());
        assert_eq!(store.users.read().await.by_id.len(), 1);
    }
}
