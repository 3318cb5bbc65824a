use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use loopcheck_core::write_text_atomic;
use loopcheck_shim::{ThemeSelection, BUNDLED_SHIM_MANIFEST};
use loopcheck_troubleshoot::{ClientCookieJar, CookiePolicy, SessionCookie, StaticExtensionRegistry};

const FALLBACK_THEME: &str = "default";

/// Loads the host description. A missing file yields an empty registry.
pub(crate) fn load_host_registry(path: &Path) -> Result<StaticExtensionRegistry> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "host description missing; no extensions known");
        return Ok(StaticExtensionRegistry {
            extensions: Vec::new(),
            themes: ThemeSelection {
                active: FALLBACK_THEME.to_string(),
                default: FALLBACK_THEME.to_string(),
            },
        });
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read host description {}", path.display()))?;
    serde_json::from_str::<StaticExtensionRegistry>(&raw)
        .with_context(|| format!("failed to parse host description {}", path.display()))
}

/// Writes the bundled shim to `path` unless a file is already there.
pub(crate) fn ensure_shim_source(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    write_text_atomic(path, BUNDLED_SHIM_MANIFEST)
        .with_context(|| format!("failed to materialize shim source {}", path.display()))?;
    tracing::info!(path = %path.display(), "bundled shim source written");
    Ok(())
}

/// Cookie jar persisted as a JSON array, standing in for the operator's
/// browser between CLI invocations.
#[derive(Debug, Clone)]
pub(crate) struct FileCookieJar {
    path: PathBuf,
}

impl FileCookieJar {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn load(&self) -> Result<Vec<SessionCookie>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read cookie file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse cookie file {}", self.path.display()))
    }

    /// Name/value pairs forwarded on loopback probes.
    pub(crate) fn request_pairs(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect())
    }

    fn store(&self, cookies: &[SessionCookie]) -> io::Result<()> {
        let encoded = serde_json::to_string_pretty(cookies).map_err(io::Error::other)?;
        write_text_atomic(&self.path, &format!("{encoded}\n"))
            .map_err(|error| io::Error::other(format!("{error:#}")))
    }

    fn load_io(&self) -> io::Result<Vec<SessionCookie>> {
        self.load()
            .map_err(|error| io::Error::other(format!("{error:#}")))
    }
}

impl ClientCookieJar for FileCookieJar {
    fn set_cookie(&self, cookie: &SessionCookie) -> io::Result<()> {
        let mut cookies = self.load_io()?;
        cookies.retain(|existing| existing.name != cookie.name);
        cookies.push(cookie.clone());
        self.store(&cookies)
    }

    fn clear_cookie(&self, name: &str, _policy: &CookiePolicy) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut cookies = self.load_io()?;
        let before = cookies.len();
        cookies.retain(|existing| existing.name != name);
        if cookies.len() == before {
            return Ok(());
        }
        self.store(&cookies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str) -> SessionCookie {
        SessionCookie {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            domain: None,
        }
    }

    #[test]
    fn functional_file_cookie_jar_keeps_other_cookies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let jar = FileCookieJar::new(temp.path().join("state").join("cookies.json"));
        jar.set_cookie(&cookie("logged_in", "admin")).expect("set login");
        jar.set_cookie(&cookie("loopcheck-disable-extensions", "abc"))
            .expect("set session");
        jar.set_cookie(&cookie("loopcheck-disable-extensions", "def"))
            .expect("replace session");

        assert_eq!(
            jar.request_pairs().expect("pairs"),
            vec![
                ("logged_in".to_string(), "admin".to_string()),
                ("loopcheck-disable-extensions".to_string(), "def".to_string()),
            ]
        );

        jar.clear_cookie("loopcheck-disable-extensions", &CookiePolicy::default())
            .expect("clear");
        assert_eq!(jar.load().expect("load").len(), 1);
    }

    #[test]
    fn unit_clear_cookie_without_file_is_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let jar = FileCookieJar::new(temp.path().join("cookies.json"));
        jar.clear_cookie("anything", &CookiePolicy::default())
            .expect("clear");
        assert!(!temp.path().join("cookies.json").exists());
    }

    #[test]
    fn functional_missing_host_file_yields_empty_registry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = load_host_registry(&temp.path().join("host.json")).expect("registry");
        assert!(registry.extensions.is_empty());
        assert_eq!(registry.themes.active, "default");
    }

    #[test]
    fn regression_malformed_host_file_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("host.json");
        std::fs::write(&path, "{\"extensions\": [").expect("write");
        let error = load_host_registry(&path).expect_err("malformed");
        assert!(format!("{error:#}").contains("failed to parse host description"));
    }

    #[test]
    fn functional_ensure_shim_source_writes_bundled_copy_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shim").join("loopcheck-shim.toml");
        ensure_shim_source(&path).expect("materialize");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            BUNDLED_SHIM_MANIFEST
        );

        std::fs::write(&path, "name = \"custom\"\nversion = \"9.0.0\"\nhook = \"x\"\n")
            .expect("overwrite");
        ensure_shim_source(&path).expect("keep");
        assert!(std::fs::read_to_string(&path)
            .expect("read")
            .contains("9.0.0"));
    }
}
