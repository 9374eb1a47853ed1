//! PreKey table operations.
//!
//! Two partitions share the table, split by `is_signed`: exactly one signed
//! prekey per user (replacement deletes the old row in the same
//! transaction), and a pool of single-use one-time prekeys. Distribution of
//! a one-time key is a single `DELETE ... RETURNING` statement so two
//! concurrent bundle fetches can never hand out the same key.

use crate::db::Database;
use crate::models::{OneTimePreKey, SignedPreKey};
use anyhow::{Context, Result};
use sqlx::Row;

impl Database {
    /// Atomically replaces the user's signed prekey.
    pub async fn replace_signed_prekey(
        &self,
        user_id: i64,
        key_id: i64,
        public_key: &str,
        signature: &str,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin signed-prekey transaction")?;

        sqlx::query("DELETE FROM prekeys WHERE user_id = ?1 AND is_signed = 1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete previous signed prekey")?;

        sqlx::query(
            r#"
            INSERT INTO prekeys (user_id, key_id, public_key, is_signed, signature, created_at)
            VALUES (?1, ?2, ?3, 1, ?4, ?5)
            "#,
        )
        .bind(user_id)
        .bind(key_id)
        .bind(public_key)
        .bind(signature)
        .bind(now() as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to insert signed prekey")?;

        tx.commit()
            .await
            .context("Failed to commit signed-prekey replacement")?;
        Ok(())
    }

    /// The user's current signed prekey, if one has been published.
    pub async fn get_signed_prekey(&self, user_id: i64) -> Result<Option<SignedPreKey>> {
        let row = sqlx::query(
            "SELECT key_id, public_key, signature FROM prekeys
             WHERE user_id = ?1 AND is_signed = 1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch signed prekey")?;

        Ok(row.map(|row| SignedPreKey {
            key_id: row.get("key_id"),
            public_key: row.get("public_key"),
            signature: row.get("signature"),
        }))
    }

    /// Inserts one one-time prekey. Returns false when (user_id, key_id)
    /// already exists, so re-uploading a batch is idempotent.
    pub async fn insert_one_time_prekey(
        &self,
        user_id: i64,
        key_id: i64,
        public_key: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO prekeys (user_id, key_id, public_key, is_signed, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            "#,
        )
        .bind(user_id)
        .bind(key_id)
        .bind(public_key)
        .bind(now() as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert one-time prekey")?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes and returns the user's lowest-keyId one-time prekey.
    ///
    /// Selection and deletion are one statement; under any pool
    /// interleaving a given key is returned to at most one caller.
    pub async fn take_one_time_prekey(&self, user_id: i64) -> Result<Option<OneTimePreKey>> {
        let row = sqlx::query(
            r#"
            DELETE FROM prekeys
            WHERE id = (
                SELECT id FROM prekeys
                WHERE user_id = ?1 AND is_signed = 0
                ORDER BY key_id ASC
                LIMIT 1
            )
            RETURNING key_id, public_key
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to consume one-time prekey")?;

        Ok(row.map(|row| OneTimePreKey {
            key_id: row.get("key_id"),
            public_key: row.get("public_key"),
        }))
    }

    pub async fn count_one_time_prekeys(&self, user_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM prekeys WHERE user_id = ?1 AND is_signed = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count one-time prekeys")?;
        Ok(row.get("n"))
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
