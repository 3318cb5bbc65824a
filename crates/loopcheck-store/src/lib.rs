//! Persisted option storage and the capability token store for loopcheck.
//!
//! The controller that issues loopback probes and the bootstrap hook that
//! evaluates them run in different process invocations. They share no memory
//! and rendezvous only through the key/value entries defined here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

mod capability;
mod sqlite;

pub use capability::{
    client_bound_token, constant_time_eq, AllowList, BisectionToken, CapabilityTokenStore,
    ALLOWED_EXTENSIONS_OPTION, DEFAULT_PRESENTATION_OPTION, DISABLE_EXTENSION_HASH_OPTION,
    SESSION_OWNER_OPTION,
};
pub use sqlite::SqliteOptionStore;

/// Result type for option store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by option store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("option name cannot be empty")]
    EmptyOptionName,
    #[error("invalid persisted value for '{option}': {reason}")]
    InvalidPersistedValue { option: String, reason: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Key/value settings store contract shared by the controller and the shim.
///
/// Implementations must be read-after-write consistent for a single caller.
pub trait OptionStore: Send + Sync {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>>;
    fn set_option(&self, name: &str, value: &str) -> StoreResult<()>;
    /// Removes `name`; removing an absent option is not an error.
    fn delete_option(&self, name: &str) -> StoreResult<()>;
    /// Writes `value` only when the current value equals `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    fn compare_and_set(&self, name: &str, expected: Option<&str>, value: &str)
        -> StoreResult<bool>;
}

impl<T: OptionStore + ?Sized> OptionStore for Arc<T> {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        (**self).get_option(name)
    }

    fn set_option(&self, name: &str, value: &str) -> StoreResult<()> {
        (**self).set_option(name, value)
    }

    fn delete_option(&self, name: &str) -> StoreResult<()> {
        (**self).delete_option(name)
    }

    fn compare_and_set(
        &self,
        name: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        (**self).compare_and_set(name, expected, value)
    }
}

impl<T: OptionStore + ?Sized> OptionStore for &T {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        (**self).get_option(name)
    }

    fn set_option(&self, name: &str, value: &str) -> StoreResult<()> {
        (**self).set_option(name, value)
    }

    fn delete_option(&self, name: &str) -> StoreResult<()> {
        (**self).delete_option(name)
    }

    fn compare_and_set(
        &self,
        name: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        (**self).compare_and_set(name, expected, value)
    }
}

fn validate_option_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::EmptyOptionName);
    }
    Ok(())
}

/// In-memory implementation for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct InMemoryOptionStore {
    options: Mutex<HashMap<String, String>>,
}

impl InMemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of options currently held.
    pub fn len(&self) -> usize {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OptionStore for InMemoryOptionStore {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        validate_option_name(name)?;
        let options = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(options.get(name).cloned())
    }

    fn set_option(&self, name: &str, value: &str) -> StoreResult<()> {
        validate_option_name(name)?;
        let mut options = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        options.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete_option(&self, name: &str) -> StoreResult<()> {
        validate_option_name(name)?;
        let mut options = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        options.remove(name);
        Ok(())
    }

    fn compare_and_set(
        &self,
        name: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        validate_option_name(name)?;
        let mut options = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        if options.get(name).map(String::as_str) != expected {
            return Ok(false);
        }
        options.insert(name.to_string(), value.to_string());
        Ok(true)
    }
}
