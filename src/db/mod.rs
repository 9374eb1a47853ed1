//! Database layer for the Sealbox relay server using SQLite.
//!
//! Three durable tables: users (identity), prekeys (signed + one-time key
//! material), message_log (append-mostly relay metadata). The encrypted
//! payloads themselves are never stored. Sub-modules add the prekey and
//! message-log operations onto `Database`.

pub mod message_log;
pub mod prekeys;

use crate::models::User;
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool as Pool};

/// Database connection pool and operations
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Create a new database connection to the specified file path.
    pub async fn new(db_path: &str) -> Result<Self> {
        let is_memory = db_path == ":memory:";

        let db_url = if is_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", db_path)
        };

        // Each :memory: connection opens its own private database, so the
        // pool must not grow past one connection there.
        let max_connections = if is_memory { 1 } else { 5 };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(std::time::Duration::from_secs(300))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    use sqlx::Executor;
                    conn.execute("PRAGMA busy_timeout = 5000").await?;
                    conn.execute("PRAGMA journal_mode = WAL").await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations to create or update schema
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                registration_id INTEGER NOT NULL,
                identity_key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create users table")?;

        // key_id uniqueness is per user per partition (signed vs one-time)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prekeys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                key_id INTEGER NOT NULL,
                public_key TEXT NOT NULL,
                is_signed INTEGER NOT NULL DEFAULT 0,
                signature TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, key_id, is_signed),
                FOREIGN KEY (user_id) REFERENCES users (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create prekeys table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_prekeys_user_kind ON prekeys (user_id, is_signed, key_id)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create prekeys index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                message_type TEXT NOT NULL,
                payload_ref TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'sent',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users (id),
                FOREIGN KEY (receiver_id) REFERENCES users (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create message_log table")?;

        Ok(())
    }

    // ── User operations ──

    /// Inserts a new user unless the population cap is already reached.
    ///
    /// The cap check and the insert are a single statement, so concurrent
    /// registrations cannot overshoot the cap. Returns `None` when the cap
    /// refused the insert. A username collision surfaces as a database
    /// error carrying a unique-constraint violation.
    pub async fn create_user(
        &self,
        username: &str,
        registration_id: i64,
        identity_key: &str,
        max_users: u32,
    ) -> Result<Option<User>> {
        let created_at = now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, registration_id, identity_key, created_at, last_seen)
            SELECT ?1, ?2, ?3, ?4, ?4
            WHERE (SELECT COUNT(*) FROM users) < ?5
            "#,
        )
        .bind(username)
        .bind(registration_id)
        .bind(identity_key)
        .bind(created_at as i64)
        .bind(max_users as i64)
        .execute(&self.pool)
        .await
        .context("Failed to create user")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            registration_id,
            identity_key: identity_key.to_string(),
            created_at,
            last_seen: created_at,
        }))
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check username")?;
        Ok(row.is_some())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, registration_id, identity_key, created_at, last_seen
             FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by username")?;

        Ok(row.map(row_to_user))
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, registration_id, identity_key, created_at, last_seen
             FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by id")?;

        Ok(row.map(row_to_user))
    }

    /// The earliest-registered user other than the caller.
    pub async fn get_partner_of(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, registration_id, identity_key, created_at, last_seen
             FROM users WHERE id != ?1 ORDER BY id ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch partner")?;

        Ok(row.map(row_to_user))
    }

    pub async fn count_users(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;
        Ok(row.get("n"))
    }

    pub async fn touch_last_seen(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_seen = ?1 WHERE id = ?2")
            .bind(now() as i64)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to update last_seen")?;
        Ok(())
    }
}

/// True when the error chain bottoms out in a SQLite unique-constraint
/// violation (used to turn a username race into a `Conflict`).
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|dbe| dbe.is_unique_violation())
        .unwrap_or(false)
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        registration_id: row.get("registration_id"),
        identity_key: row.get("identity_key"),
        created_at: row.get::<i64, _>("created_at") as u64,
        last_seen: row.get::<i64, _>("last_seen") as u64,
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
