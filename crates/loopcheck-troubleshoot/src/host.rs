//! Host-application collaborators the troubleshooting flows depend on.

use std::io;
use std::sync::{Mutex, PoisonError};

use loopcheck_installer::{FilesystemCredentials, InstallOutcome, ShimFilesystem, ShimInstaller};
use loopcheck_shim::{ExtensionDescriptor, ThemeSelection};
use serde::{Deserialize, Serialize};

/// Trait contract for the host's capability check.
pub trait PermissionGate {
    fn current_user_can_view_diagnostics(&self) -> bool;
}

/// Fixed answer, for hosts where the caller's rights are already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPermission(pub bool);

impl PermissionGate for StaticPermission {
    fn current_user_can_view_diagnostics(&self) -> bool {
        self.0
    }
}

/// Trait contract for the host's extension and theme registry.
pub trait ExtensionRegistry {
    /// Active extensions in registry order.
    fn list_active_extensions(&self) -> Vec<ExtensionDescriptor>;
    fn list_themes(&self) -> ThemeSelection;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Registry snapshot, e.g. loaded from a host description file.
pub struct StaticExtensionRegistry {
    #[serde(default)]
    pub extensions: Vec<ExtensionDescriptor>,
    pub themes: ThemeSelection,
}

impl ExtensionRegistry for StaticExtensionRegistry {
    fn list_active_extensions(&self) -> Vec<ExtensionDescriptor> {
        self.extensions.clone()
    }

    fn list_themes(&self) -> ThemeSelection {
        self.themes.clone()
    }
}

/// Makes sure the must-load shim is in place before anything is persisted.
pub trait ShimProvisioner {
    fn ensure_installed(&self) -> InstallOutcome;
}

impl<F: ShimFilesystem, C: FilesystemCredentials> ShimProvisioner for ShimInstaller<F, C> {
    fn ensure_installed(&self) -> InstallOutcome {
        ShimInstaller::ensure_installed(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Path and domain scoping for the session cookie.
pub struct CookiePolicy {
    pub path: String,
    pub domain: Option<String>,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Session-lifetime cookie handed to the operator's client. No expiry.
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("path", &self.path)
            .field("domain", &self.domain)
            .finish()
    }
}

impl SessionCookie {
    /// Renders the cookie as a `Set-Cookie` header value.
    pub fn to_set_cookie_header(&self) -> String {
        let mut rendered = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(domain) = &self.domain {
            rendered.push_str("; Domain=");
            rendered.push_str(domain);
        }
        rendered
    }
}

/// Trait contract for delivering cookies to the operator's client.
pub trait ClientCookieJar {
    fn set_cookie(&self, cookie: &SessionCookie) -> io::Result<()>;
    fn clear_cookie(&self, name: &str, policy: &CookiePolicy) -> io::Result<()>;
}

impl<T: ClientCookieJar + ?Sized> ClientCookieJar for &T {
    fn set_cookie(&self, cookie: &SessionCookie) -> io::Result<()> {
        (**self).set_cookie(cookie)
    }

    fn clear_cookie(&self, name: &str, policy: &CookiePolicy) -> io::Result<()> {
        (**self).clear_cookie(name, policy)
    }
}

/// Cookie jar kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCookieJar {
    cookies: Mutex<Vec<SessionCookie>>,
}

impl InMemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<SessionCookie> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|cookie| cookie.name == name)
            .cloned()
    }
}

impl ClientCookieJar for InMemoryCookieJar {
    fn set_cookie(&self, cookie: &SessionCookie) -> io::Result<()> {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|existing| existing.name != cookie.name);
        cookies.push(cookie.clone());
        Ok(())
    }

    fn clear_cookie(&self, name: &str, _policy: &CookiePolicy) -> io::Result<()> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|existing| existing.name != name);
        Ok(())
    }
}

#[derive(Clone, Copy)]
/// Borrowed host collaborators shared by the controller and the session
/// lifecycle.
pub struct HostServices<'a> {
    pub permissions: &'a dyn PermissionGate,
    pub registry: &'a dyn ExtensionRegistry,
    pub shim: &'a dyn ShimProvisioner,
}

impl std::fmt::Debug for HostServices<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_set_cookie_header_includes_domain_only_when_configured() {
        let mut cookie = SessionCookie {
            name: "loopcheck-disable-extensions".to_string(),
            value: "abc".to_string(),
            path: "/".to_string(),
            domain: None,
        };
        assert_eq!(
            cookie.to_set_cookie_header(),
            "loopcheck-disable-extensions=abc; Path=/"
        );
        cookie.domain = Some("example.test".to_string());
        assert!(cookie.to_set_cookie_header().ends_with("; Domain=example.test"));
        assert!(!format!("{cookie:?}").contains("abc"));
    }

    #[test]
    fn unit_in_memory_cookie_jar_replaces_and_clears_by_name() {
        let jar = InMemoryCookieJar::new();
        let mut cookie = SessionCookie {
            name: "session".to_string(),
            value: "one".to_string(),
            path: "/".to_string(),
            domain: None,
        };
        jar.set_cookie(&cookie).expect("set");
        cookie.value = "two".to_string();
        jar.set_cookie(&cookie).expect("replace");
        assert_eq!(jar.get("session").map(|cookie| cookie.value), Some("two".to_string()));

        jar.clear_cookie("session", &CookiePolicy::default()).expect("clear");
        assert!(jar.get("session").is_none());
    }

    #[test]
    fn functional_static_registry_deserializes_host_description() {
        let registry: StaticExtensionRegistry = serde_json::from_str(
            r#"{"extensions":[{"slug":"akismet","name":"Akismet"}],
                "themes":{"active":"storefront","default":"twentytwentyfour"}}"#,
        )
        .expect("decode");
        assert_eq!(registry.list_active_extensions().len(), 1);
        assert_eq!(registry.list_themes().default, "twentytwentyfour");
    }
}
