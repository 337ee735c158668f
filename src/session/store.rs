// Credential persistence
// A two-key SQLite surface: the bearer credential and the cached profile snapshot

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::types::{Credential, UserIdentity};

/// Storage key for the bearer credential
const CREDENTIAL_KEY: &str = "backoffice:session:credential";

/// Storage key for the cached profile snapshot
const PROFILE_KEY: &str = "backoffice:session:profile";

/// Persistent key/value store for the session credential and the cached
/// profile snapshot.
///
/// Single-writer: only the `SessionController` calls the mutating methods.
/// The two keys are written and removed inside one transaction so no reader
/// ever observes a token without its snapshot or vice versa.
pub struct CredentialStore {
    db_path: PathBuf,
}

impl CredentialStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open session store: {}", self.db_path.display()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to initialize session_kv table")?;

        Ok(conn)
    }

    /// Load the persisted credential, if any
    pub fn load_credential(&self) -> Result<Option<Credential>> {
        match self.load_value(CREDENTIAL_KEY)? {
            Some(json) => {
                let credential: Credential = serde_json::from_str(&json)
                    .context("Failed to parse stored credential")?;
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    /// Load the cached profile snapshot, if any.
    /// Best-effort display data, never proof of authentication.
    pub fn load_profile(&self) -> Result<Option<UserIdentity>> {
        match self.load_value(PROFILE_KEY)? {
            Some(json) => {
                let profile: UserIdentity = serde_json::from_str(&json)
                    .context("Failed to parse cached profile")?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// Persist credential and profile snapshot together
    pub fn save(&self, credential: &Credential, profile: &UserIdentity) -> Result<()> {
        let credential_json =
            serde_json::to_string(credential).context("Failed to serialize credential")?;
        let profile_json =
            serde_json::to_string(profile).context("Failed to serialize profile")?;

        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .context("Failed to start store transaction")?;
        tx.execute(
            "INSERT OR REPLACE INTO session_kv (key, value) VALUES (?1, ?2)",
            rusqlite::params![CREDENTIAL_KEY, credential_json],
        )
        .context("Failed to write credential")?;
        tx.execute(
            "INSERT OR REPLACE INTO session_kv (key, value) VALUES (?1, ?2)",
            rusqlite::params![PROFILE_KEY, profile_json],
        )
        .context("Failed to write profile snapshot")?;
        tx.commit().context("Failed to commit store transaction")?;

        Ok(())
    }

    /// Remove both keys together
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .context("Failed to start store transaction")?;
        tx.execute(
            "DELETE FROM session_kv WHERE key IN (?1, ?2)",
            [CREDENTIAL_KEY, PROFILE_KEY],
        )
        .context("Failed to clear session keys")?;
        tx.commit().context("Failed to commit store transaction")?;

        Ok(())
    }

    /// True when no credential is persisted
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.load_value(CREDENTIAL_KEY)?.is_none())
    }

    fn load_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT value FROM session_kv WHERE key = ?1")
            .context("Failed to prepare store query")?;
        let mut rows = stmt.query([key]).context("Failed to query session_kv")?;

        match rows.next().context("Failed to read session_kv row")? {
            Some(row) => Ok(Some(row.get(0).context("Failed to read store value")?)),
            None => Ok(None),
        }
    }
}
