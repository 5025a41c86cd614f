//! In-memory credential store.
//!
//! All mutations take the single write lock, which makes the email
//! uniqueness check and the insert/update one atomic step.

use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::{OnceCell, RwLock};

use super::ServiceError;
use crate::models::{NewUser, User, UserChanges, UserType};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Id of the seeded primary admin.
pub const PRIMARY_ADMIN_ID: u64 = 1;

struct Inner {
    users: BTreeMap<u64, User>,
    next_id: u64,
}

pub struct CredentialStore {
    inner: RwLock<Inner>,
    work_factor: u32,
    /// Verified against when the email is unknown, so a miss costs as much as
    /// a wrong password.
    dummy_hash: OnceCell<PasswordHashString>,
}

impl CredentialStore {
    pub fn new(work_factor: u32) -> Self {
        Self {
            inner: RwLock::new(Inner {
                users: BTreeMap::new(),
                next_id: PRIMARY_ADMIN_ID,
            }),
            work_factor,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Build a store holding only the primary admin.
    pub async fn seeded(
        work_factor: u32,
        name: &str,
        email: &str,
        password: Password,
    ) -> Result<Self, ServiceError> {
        let store = Self::new(work_factor);
        let password_hash = store.hash(password).await?;
        let admin = store
            .create(NewUser {
                name: name.to_string(),
                email: email.to_string(),
                user_type: UserType::Admin,
                password_hash,
            })
            .await?;
        store.dummy_hash().await?;
        tracing::info!(user_id = admin.id, "Seeded primary admin");
        Ok(store)
    }

    /// Hash on the blocking pool; Argon2 is deliberately slow.
    pub async fn hash(&self, password: Password) -> Result<PasswordHashString, ServiceError> {
        let work_factor = self.work_factor;
        tokio::task::spawn_blocking(move || hash_password(&password, work_factor))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Hashing task failed: {}", e)))?
            .map_err(ServiceError::Internal)
    }

    pub async fn create(&self, data: NewUser) -> Result<User, ServiceError> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == data.email) {
            return Err(ServiceError::DuplicateEmail);
        }

        let now = Utc::now();
        let user = User {
            id: inner.next_id,
            name: data.name,
            email: data.email,
            user_type: data.user_type,
            password_hash: data.password_hash,
            created_at: now,
            updated_at: now,
        };
        inner.next_id += 1;
        inner.users.insert(user.id, user.clone());

        Ok(user)
    }

    pub async fn get(&self, id: u64) -> Option<User> {
        self.inner.read().await.users.get(&id).cloned()
    }

    pub async fn get_by_email(&self, email: &str) -> Option<User> {
        self.inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    /// Merge `changes` into user `id`. `Ok(None)` when the user does not exist.
    pub async fn update(&self, id: u64, changes: UserChanges) -> Result<Option<User>, ServiceError> {
        let mut inner = self.inner.write().await;

        if let Some(email) = &changes.email {
            if inner.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(ServiceError::DuplicateEmail);
            }
        }

        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(user_type) = changes.user_type {
            user.user_type = user_type;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = Utc::now();

        Ok(Some(user.clone()))
    }

    /// Remove user `id`. `Ok(false)` when the user does not exist.
    pub async fn delete(&self, id: u64) -> Result<bool, ServiceError> {
        if id == PRIMARY_ADMIN_ID {
            return Err(ServiceError::ForbiddenOperation(
                "Cannot delete the primary admin user".to_string(),
            ));
        }
        Ok(self.inner.write().await.users.remove(&id).is_some())
    }

    pub async fn email_exists(&self, email: &str, exclude_id: Option<u64>) -> bool {
        self.inner
            .read()
            .await
            .users
            .values()
            .any(|u| u.email == email && Some(u.id) != exclude_id)
    }

    /// The user when `password` matches; `None` for unknown email or wrong password.
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: Password,
    ) -> Result<Option<User>, ServiceError> {
        let user = self.get_by_email(email).await;
        let hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash().await?.clone(),
        };

        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash).is_ok())
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Verification task failed: {}", e)))?;

        Ok(user.filter(|_| matches))
    }

    async fn dummy_hash(&self) -> Result<&PasswordHashString, ServiceError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash(Password::new("dummy-password-for-timing".to_string())))
            .await
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// Snapshot ordered by id.
    pub async fn list(&self) -> Vec<User> {
        self.inner.read().await.users.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> CredentialStore {
        CredentialStore::seeded(
            10,
            "Admin",
            "admin@example.com",
            Password::new("admin123".to_string()),
        )
        .await
        .unwrap()
    }

    async fn new_user(store: &CredentialStore, email: &str) -> NewUser {
        NewUser {
            name: "Jane".to_string(),
            email: email.to_string(),
            user_type: UserType::User,
            password_hash: store.hash(Password::new("secret1".to_string())).await.unwrap(),
        }
    }

    #[tokio::test]
    async fn test_seeded_admin() {
        let store = store().await;
        let admin = store.get(PRIMARY_ADMIN_ID).await.unwrap();
        assert_eq!(admin.email, "admin@example.com");
        assert_eq!(admin.user_type, UserType::Admin);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids_and_rejects_duplicates() {
        let store = store().await;
        let jane = store.create(new_user(&store, "jane@example.com").await).await.unwrap();
        assert_eq!(jane.id, 2);

        let dup = store.create(new_user(&store, "jane@example.com").await).await;
        assert!(matches!(dup, Err(ServiceError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_update_rechecks_email_excluding_self() {
        let store = store().await;
        let jane = store.create(new_user(&store, "jane@example.com").await).await.unwrap();

        let same_email = UserChanges {
            email: Some("jane@example.com".to_string()),
            ..Default::default()
        };
        assert!(store.update(jane.id, same_email).await.unwrap().is_some());

        let taken = UserChanges {
            email: Some("admin@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.update(jane.id, taken).await,
            Err(ServiceError::DuplicateEmail)
        ));

        let renamed = UserChanges {
            name: Some("Janet".to_string()),
            ..Default::default()
        };
        let updated = store.update(jane.id, renamed).await.unwrap().unwrap();
        assert_eq!(updated.name, "Janet");
        assert!(updated.updated_at >= updated.created_at);

        assert!(store.update(99, UserChanges::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_primary_admin_cannot_be_deleted() {
        let store = store().await;
        assert!(matches!(
            store.delete(PRIMARY_ADMIN_ID).await,
            Err(ServiceError::ForbiddenOperation(_))
        ));
        assert!(store.get(PRIMARY_ADMIN_ID).await.is_some());
        assert!(!store.delete(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_credentials() {
        let store = store().await;
        let ok = store
            .verify_credentials("admin@example.com", Password::new("admin123".to_string()))
            .await
            .unwrap();
        assert!(ok.is_some());

        let wrong = store
            .verify_credentials("admin@example.com", Password::new("nope".to_string()))
            .await
            .unwrap();
        assert!(wrong.is_none());

        let unknown = store
            .verify_credentials("ghost@example.com", Password::new("admin123".to_string()))
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_unknown_email_still_runs_a_verification() {
        let store = CredentialStore::new(10);
        assert!(!store.dummy_hash.initialized());

        let unknown = store
            .verify_credentials("ghost@example.com", Password::new("dummy-password-for-timing".to_string()))
            .await
            .unwrap();
        assert!(unknown.is_none());
        assert!(store.dummy_hash.initialized());
        assert!(store.dummy_hash.get().unwrap().as_str().contains("m=1024"));
    }

    #[tokio::test]
    async fn test_email_exists() {
        let store = store().await;
        assert!(store.email_exists("admin@example.com", None).await);
        assert!(!store.email_exists("admin@example.com", Some(PRIMARY_ADMIN_ID)).await);
    }
}
