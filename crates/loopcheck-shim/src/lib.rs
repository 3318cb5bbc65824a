//! Must-load bootstrap shim for loopcheck troubleshooting mode.
//!
//! Decides, once per incoming request and before any extension registers,
//! which extensions and which presentation layer the request may use. The
//! decision itself is a pure function of the persisted token, the presented
//! token and the persisted allow-list; the surrounding hook only gathers
//! those inputs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

mod hook;
mod policy;
mod request;

pub use hook::{BootstrapHook, BootstrapPlan, MustLoadDirectory};
pub use policy::{resolve_loading_policy, LoadingPolicy};
pub use request::{parse_cookie_header, BootstrapRequest};

/// File name the host's bootstrap scanner looks for in its must-load directory.
pub const SHIM_FILE_NAME: &str = "loopcheck-shim.toml";
/// Query parameter carrying the bisection token on probe requests.
pub const TOKEN_QUERY_PARAM: &str = "loopcheck-disable-extension-hash";
/// Query parameter carrying the comma-joined allow-list on probe requests.
pub const ALLOW_LIST_QUERY_PARAM: &str = "loopcheck-allowed-extensions";
/// Client-visible cookie holding the session token.
pub const TROUBLESHOOT_COOKIE_NAME: &str = "loopcheck-disable-extensions";
/// Manifest shipped with this crate; the canonical shim source.
pub const BUNDLED_SHIM_MANIFEST: &str = include_str!("../assets/loopcheck-shim.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Active extension as exposed by the host's extension registry.
pub struct ExtensionDescriptor {
    /// Always the reduced slug, whether built with [`ExtensionDescriptor::new`]
    /// or deserialized from a registry listing `dir/file` paths.
    #[serde(deserialize_with = "deserialize_extension_slug")]
    pub slug: String,
    pub name: String,
}

impl ExtensionDescriptor {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: extension_slug(&slug.into()),
            name: name.into(),
        }
    }
}

fn deserialize_extension_slug<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(extension_slug(&raw))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Presentation layers known to the host.
pub struct ThemeSelection {
    pub active: String,
    pub default: String,
}

/// Reduces a registry path such as `akismet/akismet.php` to its slug.
///
/// Identifiers without a directory component are returned trimmed.
pub fn extension_slug(identifier: &str) -> String {
    let trimmed = identifier.trim();
    match trimmed.split_once('/') {
        Some((directory, _)) if !directory.trim().is_empty() => directory.trim().to_string(),
        _ => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Declared metadata of a shim file.
pub struct ShimManifest {
    pub name: String,
    pub version: String,
    pub hook: String,
}

impl ShimManifest {
    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: ShimManifest =
            toml::from_str(raw).context("failed to parse shim manifest")?;
        if manifest.version.trim().is_empty() {
            bail!("shim manifest version cannot be empty");
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shim manifest {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid shim manifest {}", path.display()))
    }

    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_SHIM_MANIFEST)
    }
}

/// Location of the shim inside a must-load directory.
pub fn shim_install_path(must_load_dir: &Path) -> PathBuf {
    must_load_dir.join(SHIM_FILE_NAME)
}
