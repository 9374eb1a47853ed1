//! State management for the Sealbox relay server.
//!
//! `AppState` owns the database, the presence registry, and the credential
//! signer. Identity and prekey-store operations live here; the relay engine
//! methods are in `relay.rs`.

use crate::credentials::CredentialSigner;
use crate::db::{self, Database};
use crate::error::{RelayError, Result};
use crate::models::{Claims, KeyBundle, OneTimePreKey, User};
use crate::presence::PresenceRegistry;
use crate::validation::{normalize_username, validate_registration_id};
use std::sync::Arc;
use tracing::warn;

/// Upper bound on a single one-time prekey upload.
pub const MAX_PREKEY_BATCH: usize = 100;

/// Remaining one-time keys below this emit a low-supply warning on every
/// bundle fetch.
pub const LOW_SUPPLY_THRESHOLD: i64 = 5;

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Registration cap for the deliberately tiny trusted population.
    pub max_users: u32,
    /// HMAC secret for session credentials. `None` generates a random
    /// per-process secret, which invalidates credentials on restart.
    pub credential_secret: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_users: 2,
            credential_secret: None,
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Database connection for persistent storage
    pub db: Database,
    /// Live reachability of authenticated users
    pub presence: PresenceRegistry,
    /// Stateless session credential signer
    pub credentials: CredentialSigner,
    /// Registration cap
    pub max_users: u32,
    /// Server start time
    pub start_time: u64,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("db", &"<Database>")
            .field("max_users", &self.max_users)
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl AppState {
    /// Create new application state with a database connection
    pub async fn new(db_path: &str, config: RelayConfig) -> anyhow::Result<Self> {
        let db = Database::new(db_path).await?;
        let credentials = match config.credential_secret {
            Some(secret) => CredentialSigner::new(secret.into_bytes()),
            None => CredentialSigner::generate(),
        };

        Ok(Self {
            db,
            presence: PresenceRegistry::new(),
            credentials,
            max_users: config.max_users,
            start_time: now(),
        })
    }

    /// Create new application state with an in-memory database (for testing)
    pub async fn new_in_memory() -> anyhow::Result<Self> {
        Self::new(":memory:", RelayConfig::default()).await
    }

    /// In-memory state with explicit configuration (for testing)
    pub async fn new_in_memory_with(config: RelayConfig) -> anyhow::Result<Self> {
        Self::new(":memory:", config).await
    }

    // ── Identity & credentials ──

    pub async fn register_user(
        &self,
        username: &str,
        registration_id: i64,
        identity_key: &str,
    ) -> Result<User> {
        let username = normalize_username(username).map_err(RelayError::InvalidInput)?;
        validate_registration_id(registration_id).map_err(RelayError::InvalidInput)?;
        if identity_key.trim().is_empty() {
            return Err(RelayError::InvalidInput(
                "Identity key cannot be empty".to_string(),
            ));
        }

        if self.db.username_exists(&username).await? {
            return Err(RelayError::Conflict(format!(
                "Username '{}' is already taken",
                username
            )));
        }

        match self
            .db
            .create_user(&username, registration_id, identity_key, self.max_users)
            .await
        {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(RelayError::CapacityExceeded(format!(
                "Registration closed: user limit of {} reached",
                self.max_users
            ))),
            // Two registrations racing past the exists-check land here
            Err(err) if db::is_unique_violation(&err) => Err(RelayError::Conflict(format!(
                "Username '{}' is already taken",
                username
            ))),
            Err(err) => Err(RelayError::Internal(err)),
        }
    }

    /// Identity-continuation login: issues a fresh credential and updates
    /// lastSeen. Not password-based; acceptable only for the tiny trusted
    /// population this server is built for.
    pub async fn login_user(&self, username: &str) -> Result<(String, User, u64)> {
        let username = normalize_username(username).map_err(RelayError::InvalidInput)?;
        let user = self
            .db
            .get_user_by_username(&username)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("No user named '{}'", username)))?;

        self.db.touch_last_seen(user.id).await?;

        let (token, expires_at) = self.credentials.issue(user.id, &user.username);
        Ok((token, user, expires_at))
    }

    pub fn verify_credential(&self, token: &str) -> Result<Claims> {
        self.credentials
            .verify(token)
            .map_err(RelayError::Unauthenticated)
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<User> {
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| RelayError::NotFound("User not found".to_string()))
    }

    pub async fn get_partner(&self, user_id: i64) -> Result<User> {
        self.db
            .get_partner_of(user_id)
            .await?
            .ok_or_else(|| RelayError::NotFound("No partner registered yet".to_string()))
    }

    // ── PreKey bundle store ──

    pub async fn store_signed_prekey(
        &self,
        user_id: i64,
        key_id: i64,
        public_key: &str,
        signature: &str,
    ) -> Result<()> {
        if key_id < 1 {
            return Err(RelayError::InvalidInput(
                "Signed prekey id must be at least 1".to_string(),
            ));
        }
        if public_key.trim().is_empty() || signature.trim().is_empty() {
            return Err(RelayError::InvalidInput(
                "Signed prekey requires a public key and a signature".to_string(),
            ));
        }

        self.db
            .replace_signed_prekey(user_id, key_id, public_key, signature)
            .await?;
        Ok(())
    }

    /// Uploads a batch of one-time prekeys. Malformed entries are skipped
    /// and duplicates are idempotent; returns the count actually inserted.
    pub async fn store_one_time_prekeys(
        &self,
        user_id: i64,
        entries: &[OneTimePreKey],
    ) -> Result<usize> {
        if entries.len() > MAX_PREKEY_BATCH {
            return Err(RelayError::InvalidInput(format!(
                "At most {} one-time prekeys per upload",
                MAX_PREKEY_BATCH
            )));
        }

        let mut stored = 0;
        for entry in entries {
            if entry.key_id < 1 || entry.public_key.trim().is_empty() {
                continue;
            }
            if self
                .db
                .insert_one_time_prekey(user_id, entry.key_id, &entry.public_key)
                .await?
            {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Reads the user's bundle, consuming one one-time prekey. The one-time
    /// field is None once the supply is exhausted.
    pub async fn consume_bundle(&self, user_id: i64) -> Result<KeyBundle> {
        let user = self
            .db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| RelayError::NotFound("User not found".to_string()))?;

        let signed_prekey = self.db.get_signed_prekey(user_id).await?;
        let one_time_prekey = self.db.take_one_time_prekey(user_id).await?;

        let remaining = self.db.count_one_time_prekeys(user_id).await?;
        if remaining < LOW_SUPPLY_THRESHOLD {
            warn!(
                "One-time prekey supply low for user {}: {} remaining",
                user_id, remaining
            );
        }

        Ok(KeyBundle {
            user_id: user.id,
            registration_id: user.registration_id,
            identity_key: user.identity_key,
            signed_prekey,
            one_time_prekey,
        })
    }

    pub async fn remaining_one_time_count(&self, user_id: i64) -> Result<i64> {
        Ok(self.db.count_one_time_prekeys(user_id).await?)
    }

    pub fn uptime(&self) -> u64 {
        now() - self.start_time
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Shared application state type
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn roomy() -> RelayConfig {
        RelayConfig {
            max_users: 10,
            credential_secret: None,
        }
    }

    #[tokio::test]
    async fn test_register_validations() {
        let state = AppState::new_in_memory_with(roomy()).await.unwrap();

        let err = state.register_user("x", 1, "key").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));

        let err = state.register_user("alice", 0, "key").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));

        let err = state.register_user("alice", 1, "   ").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_register_normalization_collision() {
        let state = AppState::new_in_memory_with(roomy()).await.unwrap();

        let user = state.register_user("Alice", 1, "ka").await.unwrap();
        assert_eq!(user.username, "alice");

        // Same username after trim + lowercase
        let err = state.register_user("  ALICE ", 2, "kb").await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_registration_cap() {
        let state = AppState::new_in_memory_with(RelayConfig {
            max_users: 2,
            credential_secret: None,
        })
        .await
        .unwrap();

        state.register_user("alice", 1, "ka").await.unwrap();
        state.register_user("bob", 1, "kb").await.unwrap();

        let err = state.register_user("carol", 1, "kc").await.unwrap_err();
        assert!(matches!(err, RelayError::CapacityExceeded(_)));
    }

    #[tokio::test]
    async fn test_login_issues_verifiable_credential() {
        let state = AppState::new_in_memory_with(roomy()).await.unwrap();
        let user = state.register_user("alice", 1, "ka").await.unwrap();

        let (token, logged_in, expires_at) = state.login_user("Alice").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let claims = state.verify_credential(&token).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.expires_at, expires_at);

        let err = state.login_user("nobody").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        let err = state.verify_credential("garbage.token").unwrap_err();
        assert!(matches!(err, RelayError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_bundle_flow() {
        let state = AppState::new_in_memory_with(roomy()).await.unwrap();
        let user = state.register_user("alice", 7, "identity-a").await.unwrap();

        state
            .store_signed_prekey(user.id, 1, "spk", "sig")
            .await
            .unwrap();
        let stored = state
            .store_one_time_prekeys(
                user.id,
                &[
                    OneTimePreKey {
                        key_id: 1,
                        public_key: "opk-1".into(),
                    },
                    OneTimePreKey {
                        key_id: 2,
                        public_key: "opk-2".into(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(state.remaining_one_time_count(user.id).await.unwrap(), 2);

        let bundle = state.consume_bundle(user.id).await.unwrap();
        assert_eq!(bundle.registration_id, 7);
        assert_eq!(bundle.identity_key, "identity-a");
        assert_eq!(bundle.signed_prekey.as_ref().unwrap().key_id, 1);
        assert_eq!(bundle.one_time_prekey.as_ref().unwrap().key_id, 1);

        let bundle = state.consume_bundle(user.id).await.unwrap();
        assert_eq!(bundle.one_time_prekey.as_ref().unwrap().key_id, 2);

        // Supply exhausted: bundle still served, one-time field empty
        let bundle = state.consume_bundle(user.id).await.unwrap();
        assert!(bundle.one_time_prekey.is_none());

        let err = state.consume_bundle(9999).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_prekey_batch_rules() {
        let state = AppState::new_in_memory_with(roomy()).await.unwrap();
        let user = state.register_user("alice", 1, "ka").await.unwrap();

        let oversized: Vec<OneTimePreKey> = (1..=(MAX_PREKEY_BATCH as i64 + 1))
            .map(|key_id| OneTimePreKey {
                key_id,
                public_key: format!("opk-{}", key_id),
            })
            .collect();
        let err = state
            .store_one_time_prekeys(user.id, &oversized)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));

        // Malformed entries skipped, valid ones inserted, duplicates ignored
        let mixed = vec![
            OneTimePreKey {
                key_id: 0,
                public_key: "bad-id".into(),
            },
            OneTimePreKey {
                key_id: 3,
                public_key: "".into(),
            },
            OneTimePreKey {
                key_id: 4,
                public_key: "opk-4".into(),
            },
            OneTimePreKey {
                key_id: 4,
                public_key: "opk-4".into(),
            },
        ];
        let stored = state.store_one_time_prekeys(user.id, &mixed).await.unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bundle_consumption_is_exact() {
        let state = Arc::new(AppState::new_in_memory_with(roomy()).await.unwrap());
        let user = state.register_user("alice", 1, "ka").await.unwrap();

        let keys: Vec<OneTimePreKey> = (1..=3)
            .map(|key_id| OneTimePreKey {
                key_id,
                public_key: format!("opk-{}", key_id),
            })
            .collect();
        state.store_one_time_prekeys(user.id, &keys).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let state = Arc::clone(&state);
            let target = user.id;
            tasks.push(tokio::spawn(async move {
                state.consume_bundle(target).await.unwrap().one_time_prekey
            }));
        }

        let mut seen = Vec::new();
        let mut empty = 0;
        for task in tasks {
            match task.await.unwrap() {
                Some(prekey) => seen.push(prekey.key_id),
                None => empty += 1,
            }
        }

        // Exactly K callers get a key, each key handed out once
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(empty, 5);
        assert_eq!(state.remaining_one_time_count(user.id).await.unwrap(), 0);
    }
}
