use loopcheck_shim::{extension_slug, TROUBLESHOOT_COOKIE_NAME};
use loopcheck_store::{
    client_bound_token, constant_time_eq, AllowList, BisectionToken, CapabilityTokenStore,
    OptionStore, StoreResult,
};
use serde::Serialize;

use crate::{ClientCookieJar, CookiePolicy, HostServices, SessionCookie, TroubleshootError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Who is starting a session, and from where.
pub struct SessionOrigin {
    pub identity: String,
    pub client_address: Option<String>,
}

impl SessionOrigin {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            client_address: None,
        }
    }

    pub fn with_client_address(mut self, client_address: impl Into<String>) -> Self {
        let client_address = client_address.into();
        let trimmed = client_address.trim();
        self.client_address = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// An operator's active troubleshooting session.
pub struct TroubleshootingSession {
    pub active: bool,
    pub allow_list: AllowList,
    pub default_presentation_active: bool,
    /// Value handed to the client in the session cookie. The store holds the
    /// client-bound form when the origin carried an address.
    #[serde(skip)]
    pub client_token: BisectionToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
/// Enumerates supported `SessionStart` values.
pub enum SessionStart {
    Started { session: TroubleshootingSession },
    NeedsCredentials { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Persisted troubleshooting state as seen from outside a request.
pub struct SessionSnapshot {
    pub active: bool,
    pub owner: Option<String>,
    pub allow_list: AllowList,
    pub default_presentation_active: bool,
}

/// Starts and stops operator troubleshooting sessions.
pub struct SessionLifecycle<'a, S> {
    host: HostServices<'a>,
    tokens: CapabilityTokenStore<S>,
    cookies: &'a dyn ClientCookieJar,
    cookie_policy: CookiePolicy,
}

impl<'a, S: OptionStore> SessionLifecycle<'a, S> {
    pub fn new(
        host: HostServices<'a>,
        tokens: CapabilityTokenStore<S>,
        cookies: &'a dyn ClientCookieJar,
        cookie_policy: CookiePolicy,
    ) -> Self {
        Self {
            host,
            tokens,
            cookies,
            cookie_policy,
        }
    }

    /// Enters troubleshooting mode with `initial_allow_list` loaded for the
    /// operator. Identifiers are reduced to their slug.
    ///
    /// Nothing is persisted when permission is missing, the shim needs
    /// credentials, or another origin holds the session.
    #[tracing::instrument(level = "info", skip_all, fields(identity = %origin.identity))]
    pub fn start(
        &self,
        origin: &SessionOrigin,
        initial_allow_list: &AllowList,
    ) -> Result<SessionStart, TroubleshootError> {
        if !self.host.permissions.current_user_can_view_diagnostics() {
            return Err(TroubleshootError::PermissionDenied);
        }
        match TroubleshootError::from_install_outcome(self.host.shim.ensure_installed()) {
            None => {}
            Some(TroubleshootError::CredentialsRequired { message }) => {
                tracing::info!("session start waiting on file system credentials");
                return Ok(SessionStart::NeedsCredentials { message });
            }
            Some(error) => return Err(error),
        }

        if !self.tokens.claim_session_owner(&origin.identity)? {
            let owner = self.tokens.read_session_owner()?.unwrap_or_default();
            tracing::warn!(owner = %owner, "troubleshooting session already owned");
            return Err(TroubleshootError::SessionConflict { owner });
        }

        let allow_list = initial_allow_list
            .iter()
            .map(extension_slug)
            .filter(|slug| !slug.is_empty())
            .collect::<AllowList>();
        let client_token = BisectionToken::generate();
        let stored_token = match origin.client_address.as_deref() {
            Some(address) => client_token.bound_to_client(address),
            None => client_token.clone(),
        };
        if let Err(error) = self.tokens.persist_token(&stored_token, &allow_list) {
            self.abandon_start(&origin.identity);
            return Err(error.into());
        }

        let cookie = SessionCookie {
            name: TROUBLESHOOT_COOKIE_NAME.to_string(),
            value: client_token.as_str().to_string(),
            path: self.cookie_policy.path.clone(),
            domain: self.cookie_policy.domain.clone(),
        };
        if let Err(error) = self.cookies.set_cookie(&cookie) {
            self.abandon_start(&origin.identity);
            return Err(TroubleshootError::Cookie(error));
        }

        tracing::info!(
            allow_list = %allow_list.to_csv(),
            client_bound = origin.client_address.is_some(),
            "troubleshooting session started"
        );
        Ok(SessionStart::Started {
            session: TroubleshootingSession {
                active: true,
                default_presentation_active: self.tokens.default_presentation()?,
                allow_list,
                client_token,
            },
        })
    }

    /// Undoes a half-finished start so no live token isolates visitors
    /// without an operator cookie to match it.
    fn abandon_start(&self, identity: &str) {
        if let Err(error) = self.tokens.clear() {
            tracing::warn!(%error, "failed to clear troubleshooting state after aborted start");
        }
        if let Err(error) = self.tokens.release_session_owner(identity) {
            tracing::warn!(%error, "failed to release session owner after aborted start");
        }
    }

    /// Starts a session with only `identifier` loaded.
    pub fn start_for_single_extension(
        &self,
        origin: &SessionOrigin,
        identifier: &str,
    ) -> Result<SessionStart, TroubleshootError> {
        self.start(origin, &AllowList::single(extension_slug(identifier)))
    }

    /// Leaves troubleshooting mode: clears every persisted entry, including
    /// the session owner, and the client cookie. Idempotent.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn stop(&self) -> Result<(), TroubleshootError> {
        if !self.host.permissions.current_user_can_view_diagnostics() {
            return Err(TroubleshootError::PermissionDenied);
        }
        self.tokens.clear()?;
        self.cookies
            .clear_cookie(TROUBLESHOOT_COOKIE_NAME, &self.cookie_policy)
            .map_err(TroubleshootError::Cookie)?;
        tracing::info!("troubleshooting session stopped");
        Ok(())
    }

    /// Whether a page rendered for this cookie and client belongs to the
    /// live troubleshooting session.
    pub fn is_troubleshooting(
        &self,
        cookie_token: Option<&str>,
        client_address: Option<&str>,
    ) -> StoreResult<bool> {
        let Some(cookie_token) = cookie_token.map(str::trim).filter(|token| !token.is_empty())
        else {
            return Ok(false);
        };
        let Some(stored) = self.tokens.read_token()? else {
            return Ok(false);
        };
        let presented = match client_address.map(str::trim).filter(|address| !address.is_empty()) {
            Some(address) => client_bound_token(cookie_token, address),
            None => cookie_token.to_string(),
        };
        Ok(constant_time_eq(presented.as_bytes(), stored.as_str().as_bytes()))
    }

    pub fn snapshot(&self) -> StoreResult<SessionSnapshot> {
        Ok(SessionSnapshot {
            active: self.tokens.read_token()?.is_some(),
            owner: self.tokens.read_session_owner()?,
            allow_list: self.tokens.read_allow_list()?,
            default_presentation_active: self.tokens.default_presentation()?,
        })
    }
}

impl<S> std::fmt::Debug for SessionLifecycle<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("cookie_policy", &self.cookie_policy)
            .finish_non_exhaustive()
    }
}
