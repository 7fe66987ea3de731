use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use {
    argon2::{
        Argon2,
        password_hash::{
            PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
        },
    },
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{
    context::AuthContext,
    error::{Error, Result},
};

// ── Types ────────────────────────────────────────────────────────────────────

/// A user as known to the provider. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
}

impl From<&UserRecord> for AuthContext {
    fn from(user: &UserRecord) -> Self {
        AuthContext::for_subject(
            user.id.clone(),
            user.roles.iter().cloned(),
            user.permissions.iter().cloned(),
        )
    }
}

/// Resolves usernames and verifies credentials.
///
/// The `POST /auth/*` routes are generic over this seam; deployments point
/// it at their user database.
#[async_trait]
pub trait UserProvider: Send + Sync {
    async fn find(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Verify a username/password pair. `Ok(None)` means the pair was
    /// rejected; `Err` means the backend itself failed.
    async fn verify(&self, username: &str, password: &str) -> Result<Option<UserRecord>>;

    async fn register(
        &self,
        username: &str,
        password: &str,
        roles: HashSet<String>,
        permissions: HashSet<String>,
    ) -> Result<UserRecord>;
}

// ── In-memory provider ───────────────────────────────────────────────────────

struct StoredUser {
    record: UserRecord,
    password_hash: String,
}

/// Process-local user table with argon2 password hashing.
#[derive(Default)]
pub struct InMemoryUserProvider {
    users: RwLock<HashMap<String, StoredUser>>,
}

impl InMemoryUserProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user at startup.
    pub fn seed(
        &self,
        username: &str,
        password: &str,
        roles: impl IntoIterator<Item = impl Into<String>>,
        permissions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<UserRecord> {
        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            roles: roles.into_iter().map(Into::into).collect(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        };
        let hash = hash_password(password)?;
        let mut users = self.users.write().map_err(|_| Error::Hash("lock poisoned".into()))?;
        if users.contains_key(username) {
            return Err(Error::UserExists {
                username: username.to_string(),
            });
        }
        users.insert(username.to_string(), StoredUser {
            record: record.clone(),
            password_hash: hash,
        });
        Ok(record)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, StoredUser>>> {
        self.users.read().map_err(|_| Error::Hash("lock poisoned".into()))
    }
}

#[async_trait]
impl UserProvider for InMemoryUserProvider {
    async fn find(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.read()?.get(username).map(|u| u.record.clone()))
    }

    async fn verify(&self, username: &str, password: &str) -> Result<Option<UserRecord>> {
        let users = self.read()?;
        let Some(stored) = users.get(username) else {
            // Hash anyway so unknown and known usernames take comparable time.
            let _ = verify_password(password, DUMMY_HASH);
            return Ok(None);
        };
        if verify_password(password, &stored.password_hash) {
            Ok(Some(stored.record.clone()))
        } else {
            Ok(None)
        }
    }

    async fn register(
        &self,
        username: &str,
        password: &str,
        roles: HashSet<String>,
        permissions: HashSet<String>,
    ) -> Result<UserRecord> {
        self.seed(username, password, roles, permissions)
    }
}

// A syntactically valid argon2 hash that matches no real password.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

// ── Hash helpers ─────────────────────────────────────────────────────────────

/// PHC-format argon2id hash with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| Error::Hash(err.to_string()))
}

/// Check a password against a stored PHC string. Unparseable stored
/// hashes count as a mismatch, not an error.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_round_trip() {
        let provider = InMemoryUserProvider::new();
        provider
            .seed("alice", "hunter2", ["user"], ["chat.send"])
            .unwrap();

        let user = provider.verify("alice", "hunter2").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.roles.contains("user"));

        assert!(provider.verify("alice", "wrong").await.unwrap().is_none());
        assert!(provider.verify("nobody", "hunter2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let provider = InMemoryUserProvider::new();
        provider
            .register("bob", "pw", HashSet::new(), HashSet::new())
            .await
            .unwrap();
        let err = provider
            .register("bob", "pw2", HashSet::new(), HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UserExists { .. }));
    }

    #[test]
    fn context_from_record_is_authenticated() {
        let record = UserRecord {
            id: "u1".into(),
            username: "alice".into(),
            roles: HashSet::from(["admin".to_string()]),
            permissions: HashSet::from(["users.delete".to_string()]),
        };
        let ctx = AuthContext::from(&record);
        assert!(ctx.authenticated);
        assert_eq!(ctx.subject.as_deref(), Some("u1"));
        assert!(ctx.has_role("admin"));
    }
}
