//! SQLite-backed `OptionStore` shared across process invocations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use loopcheck_core::current_unix_timestamp_ms;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::{validate_option_name, OptionStore, StoreResult};

/// Persistent option store; every call opens its own connection so separate
/// processes observe each other's writes.
#[derive(Debug, Clone)]
pub struct SqliteOptionStore {
    db_path: PathBuf,
}

impl SqliteOptionStore {
    /// Opens (or creates) the store at `path`, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS options (
                option_name TEXT PRIMARY KEY,
                option_value TEXT NOT NULL,
                updated_unix_ms INTEGER NOT NULL
            );
            "#,
        )?;
        tracing::debug!(path = %store.db_path.display(), "option store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn upsert_option(connection: &Connection, name: &str, value: &str) -> StoreResult<()> {
    let updated = i64::try_from(current_unix_timestamp_ms()).unwrap_or(i64::MAX);
    connection.execute(
        r#"
        INSERT INTO options (option_name, option_value, updated_unix_ms)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(option_name) DO UPDATE SET
            option_value = excluded.option_value,
            updated_unix_ms = excluded.updated_unix_ms
        "#,
        params![name, value, updated],
    )?;
    Ok(())
}

fn select_option(connection: &Connection, name: &str) -> StoreResult<Option<String>> {
    let value = connection
        .query_row(
            "SELECT option_value FROM options WHERE option_name = ?1",
            params![name],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

impl OptionStore for SqliteOptionStore {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        validate_option_name(name)?;
        let connection = self.open_connection()?;
        select_option(&connection, name)
    }

    fn set_option(&self, name: &str, value: &str) -> StoreResult<()> {
        validate_option_name(name)?;
        let connection = self.open_connection()?;
        upsert_option(&connection, name, value)
    }

    fn delete_option(&self, name: &str) -> StoreResult<()> {
        validate_option_name(name)?;
        let connection = self.open_connection()?;
        connection.execute(
            "DELETE FROM options WHERE option_name = ?1",
            params![name],
        )?;
        Ok(())
    }

    fn compare_and_set(
        &self,
        name: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        validate_option_name(name)?;
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = select_option(&transaction, name)?;
        if current.as_deref() != expected {
            transaction.rollback()?;
            return Ok(false);
        }
        upsert_option(&transaction, name, value)?;
        transaction.commit()?;
        Ok(true)
    }
}
