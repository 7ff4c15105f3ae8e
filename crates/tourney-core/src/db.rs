// SQLite persistence for client-side state that must survive a restart.
//
// Only the wallet session lives here today: one JSON record under a fixed
// key, absent key meaning "disconnected".

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::WalletSession;

/// Key/value store backed by a single SQLite table.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS session_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned, which only happens if another thread
    /// panicked mid-query.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Persist a JSON value under `key`, replacing any previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO session_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load the JSON value stored under `key`, if any.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM session_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query session state")?;

        match json_str {
            Some(s) => {
                let value =
                    serde_json::from_str(&s).context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Remove `key`. Removing a missing key is a no-op.
    pub fn clear_state(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM session_state WHERE key = ?1", params![key])
            .context("failed to clear state")?;
        Ok(())
    }

    /// Persist a wallet session. `is_connecting` is stored as false so a
    /// crash mid-handshake does not restore a spinner.
    pub fn save_session(&self, key: &str, session: &WalletSession) -> Result<()> {
        let stored = WalletSession {
            is_connecting: false,
            ..session.clone()
        };
        let value = serde_json::to_value(&stored).context("failed to encode wallet session")?;
        self.save_state(key, &value)
    }

    /// Load the persisted wallet session. A missing key means disconnected;
    /// an unreadable record is discarded the same way.
    pub fn load_session(&self, key: &str) -> Result<WalletSession> {
        let Some(value) = self.load_state(key)? else {
            return Ok(WalletSession::disconnected());
        };
        match serde_json::from_value::<WalletSession>(value) {
            Ok(session) if session.is_consistent() => Ok(WalletSession {
                is_connecting: false,
                verified: false,
                ..session
            }),
            Ok(_) => {
                tracing::warn!("Discarding inconsistent persisted wallet session");
                Ok(WalletSession::disconnected())
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable persisted wallet session: {}", e);
                Ok(WalletSession::disconnected())
            }
        }
    }
}
