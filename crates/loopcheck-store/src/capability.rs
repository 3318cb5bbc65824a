//! Bisection token, allow-list, and the typed capability token store.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{OptionStore, StoreError, StoreResult};

pub const DISABLE_EXTENSION_HASH_OPTION: &str = "loopcheck-disable-extension-hash";
pub const ALLOWED_EXTENSIONS_OPTION: &str = "loopcheck-allowed-extensions";
pub const DEFAULT_PRESENTATION_OPTION: &str = "loopcheck-default-presentation";
pub const SESSION_OWNER_OPTION: &str = "loopcheck-session-owner";

const DEFAULT_PRESENTATION_ENABLED: &str = "yes";
const BISECTION_TOKEN_BYTES: usize = 16;

/// Opaque per-cycle token distinguishing the controller's own probes from
/// ordinary traffic.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BisectionToken(String);

impl BisectionToken {
    /// Draws a fresh 128-bit token from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; BISECTION_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex_encode(&bytes))
    }

    /// Wraps a value read back from storage or a request.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the stored form of this token for a session bound to
    /// `client_address`.
    pub fn bound_to_client(&self, client_address: &str) -> Self {
        Self(client_bound_token(&self.0, client_address))
    }
}

impl fmt::Debug for BisectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix; the full value authorizes extension loading.
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "BisectionToken({prefix}…)")
    }
}

impl fmt::Display for BisectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Appends the hex SHA-256 of `client_address` to `raw_token`.
pub fn client_bound_token(raw_token: &str, client_address: &str) -> String {
    let digest = Sha256::digest(client_address.trim().as_bytes());
    format!("{raw_token}{}", hex_encode(&digest))
}

/// Compares two token values in time independent of where they differ.
pub fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right.iter())
        .fold(0u8, |diff, (l, r)| diff | (l ^ r))
        == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        encoded.push_str(&format!("{byte:02x}"));
    }
    encoded
}

/// Ordered, de-duplicated extension identifiers allowed to load while global
/// suppression is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct AllowList {
    identifiers: Vec<String>,
}

impl AllowList {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(identifier: impl Into<String>) -> Self {
        Self::from_iter([identifier.into()])
    }

    /// Parses a comma-joined list, trimming entries and dropping blanks.
    pub fn parse_csv(raw: &str) -> Self {
        raw.split(',').map(str::to_string).collect()
    }

    pub fn to_csv(&self) -> String {
        self.identifiers.join(",")
    }

    pub fn insert(&mut self, identifier: impl Into<String>) -> bool {
        let identifier = identifier.into().trim().to_string();
        if identifier.is_empty() || self.contains(&identifier) {
            return false;
        }
        self.identifiers.push(identifier);
        true
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.iter().any(|entry| entry == identifier)
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(String::as_str)
    }
}

impl FromIterator<String> for AllowList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut allow_list = Self::default();
        for identifier in iter {
            allow_list.insert(identifier);
        }
        allow_list
    }
}

impl From<Vec<String>> for AllowList {
    fn from(identifiers: Vec<String>) -> Self {
        identifiers.into_iter().collect()
    }
}

impl From<AllowList> for Vec<String> {
    fn from(allow_list: AllowList) -> Self {
        allow_list.identifiers
    }
}

/// Typed view over the persisted troubleshooting entries.
///
/// Token and allow-list are two independent values with no transactional
/// guarantee between them; a token without an allow-list reads as an empty
/// allow-list.
#[derive(Debug, Clone)]
pub struct CapabilityTokenStore<S> {
    options: S,
}

impl<S: OptionStore> CapabilityTokenStore<S> {
    pub fn new(options: S) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &S {
        &self.options
    }

    /// Overwrites the live token and allow-list; no merge with prior values.
    pub fn persist_token(&self, token: &BisectionToken, allow_list: &AllowList) -> StoreResult<()> {
        let encoded = serde_json::to_string(allow_list)?;
        self.options
            .set_option(ALLOWED_EXTENSIONS_OPTION, &encoded)?;
        self.options
            .set_option(DISABLE_EXTENSION_HASH_OPTION, token.as_str())?;
        tracing::debug!(
            allow_list = %allow_list.to_csv(),
            allow_list_len = allow_list.len(),
            "bisection token persisted"
        );
        Ok(())
    }

    pub fn read_token(&self) -> StoreResult<Option<BisectionToken>> {
        Ok(self
            .options
            .get_option(DISABLE_EXTENSION_HASH_OPTION)?
            .filter(|raw| !raw.trim().is_empty())
            .map(BisectionToken::from_raw))
    }

    /// Reads the allow-list; absent or unreadable values yield an empty list.
    pub fn read_allow_list(&self) -> StoreResult<AllowList> {
        let Some(raw) = self.options.get_option(ALLOWED_EXTENSIONS_OPTION)? else {
            return Ok(AllowList::empty());
        };
        match decode_allow_list(&raw) {
            Ok(allow_list) => Ok(allow_list),
            Err(error) => {
                tracing::warn!(%error, "ignoring unreadable allow-list option");
                Ok(AllowList::empty())
            }
        }
    }

    pub fn set_default_presentation(&self, enabled: bool) -> StoreResult<()> {
        if enabled {
            self.options
                .set_option(DEFAULT_PRESENTATION_OPTION, DEFAULT_PRESENTATION_ENABLED)
        } else {
            self.options.delete_option(DEFAULT_PRESENTATION_OPTION)
        }
    }

    pub fn default_presentation(&self) -> StoreResult<bool> {
        Ok(self
            .options
            .get_option(DEFAULT_PRESENTATION_OPTION)?
            .is_some_and(|value| value == DEFAULT_PRESENTATION_ENABLED))
    }

    pub fn read_session_owner(&self) -> StoreResult<Option<String>> {
        self.options.get_option(SESSION_OWNER_OPTION)
    }

    /// Claims the session slot for `owner`. Succeeds when the slot is free or
    /// already held by `owner`.
    pub fn claim_session_owner(&self, owner: &str) -> StoreResult<bool> {
        match self.read_session_owner()? {
            Some(current) if current == owner => Ok(true),
            Some(_) => Ok(false),
            None => self
                .options
                .compare_and_set(SESSION_OWNER_OPTION, None, owner),
        }
    }

    /// Frees the session slot if `owner` holds it. Returns whether it did.
    pub fn release_session_owner(&self, owner: &str) -> StoreResult<bool> {
        match self.read_session_owner()? {
            Some(current) if current == owner => {
                self.options.delete_option(SESSION_OWNER_OPTION)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Deletes token, allow-list, presentation flag and session owner.
    pub fn clear(&self) -> StoreResult<()> {
        for option in [
            DISABLE_EXTENSION_HASH_OPTION,
            ALLOWED_EXTENSIONS_OPTION,
            DEFAULT_PRESENTATION_OPTION,
            SESSION_OWNER_OPTION,
        ] {
            self.options.delete_option(option)?;
        }
        tracing::debug!("capability token store cleared");
        Ok(())
    }
}

fn decode_allow_list(raw: &str) -> StoreResult<AllowList> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(AllowList::empty());
    }
    serde_json::from_str::<AllowList>(trimmed).map_err(|error| StoreError::InvalidPersistedValue {
        option: ALLOWED_EXTENSIONS_OPTION.to_string(),
        reason: error.to_string(),
    })
}
