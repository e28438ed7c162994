//! Offline login against a locally remembered password hash.
//!
//! After a successful online login the password is hashed with bcrypt and
//! kept in the local store. While offline, a login is accepted only when the
//! supplied password verifies against that hash.

use crate::error::{Error, Result};
use crate::services::LocalStore;

pub use bcrypt::DEFAULT_COST;

#[derive(Clone)]
pub struct OfflineCredentials {
    store: LocalStore,
    cost: u32,
}

impl OfflineCredentials {
    pub const fn new(store: LocalStore) -> Self {
        Self::with_cost(store, DEFAULT_COST)
    }

    /// Lower costs are only meant for tests
    pub const fn with_cost(store: LocalStore, cost: u32) -> Self {
        Self { store, cost }
    }

    /// Remember a password that the server just accepted
    pub async fn remember(&self, username: &str, password: &str) -> Result<()> {
        let username = normalize_username(username)?;
        if password.is_empty() {
            return Err(Error::Auth("Password is required".into()));
        }

        let password = password.to_string();
        let cost = self.cost;
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|error| Error::Auth(format!("Hashing task failed: {error}")))?
            .map_err(|error| Error::Auth(format!("Failed to hash password: {error}")))?;

        self.store.save_credential(&username, &hashed).await?;
        tracing::info!("Remembered offline credentials for {username}");
        Ok(())
    }

    /// Check a password while offline.
    ///
    /// Unknown users fail the same way as wrong passwords.
    pub async fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let username = normalize_username(username)?;
        let Some(stored) = self.store.load_credential(&username).await? else {
            tracing::debug!("No offline credentials for {username}");
            return Ok(false);
        };

        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &stored))
            .await
            .map_err(|error| Error::Auth(format!("Verification task failed: {error}")))?;

        match verified {
            Ok(verified) => Ok(verified),
            Err(error) => {
                tracing::warn!("Stored credential for {username} is unreadable: {error}");
                Ok(false)
            }
        }
    }

    pub async fn forget(&self, username: &str) -> Result<()> {
        let username = normalize_username(username)?;
        self.store.forget_credential(&username).await
    }
}

fn normalize_username(username: &str) -> Result<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::Auth("Username is required".into()));
    }
    Ok(username.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn credentials() -> OfflineCredentials {
        let store = LocalStore::open_in_memory().await.unwrap();
        OfflineCredentials::with_cost(store, 4)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remembered_password_verifies() {
        let credentials = credentials().await;
        credentials.remember("ana", "correct horse").await.unwrap();

        assert!(credentials.verify("ana", "correct horse").await.unwrap());
        assert!(credentials.verify(" ANA ", "correct horse").await.unwrap());
        assert!(!credentials.verify("ana", "battery staple").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_user_never_verifies() {
        let credentials = credentials().await;
        assert!(!credentials.verify("nobody", "").await.unwrap());
        assert!(!credentials.verify("nobody", "anything").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hash_is_not_the_password() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let credentials = OfflineCredentials::with_cost(store.clone(), 4);
        credentials.remember("ana", "secret").await.unwrap();

        let stored = store.load_credential("ana").await.unwrap().unwrap();
        assert_ne!(stored, "secret");
        assert!(stored.starts_with("$2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forgotten_credentials_stop_verifying() {
        let credentials = credentials().await;
        credentials.remember("ana", "secret").await.unwrap();
        credentials.forget("ana").await.unwrap();
        assert!(!credentials.verify("ana", "secret").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_inputs_are_refused() {
        let credentials = credentials().await;
        assert!(credentials.remember("", "secret").await.is_err());
        assert!(credentials.remember("ana", "").await.is_err());
    }
}
