use loopcheck_store::{client_bound_token, AllowList};

use crate::{ALLOW_LIST_QUERY_PARAM, TOKEN_QUERY_PARAM, TROUBLESHOOT_COOKIE_NAME};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Request-level inputs the bootstrap hook consults.
pub struct BootstrapRequest {
    pub query_token: Option<String>,
    /// Informational only; the hook trusts the persisted allow-list.
    pub requested_allow_list: AllowList,
    pub cookie_token: Option<String>,
    pub client_address: Option<String>,
}

impl BootstrapRequest {
    /// Parses a raw query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim().trim_start_matches('?');
        let mut request = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == TOKEN_QUERY_PARAM {
                request.query_token = non_empty(&value);
            } else if key == ALLOW_LIST_QUERY_PARAM {
                request.requested_allow_list = AllowList::parse_csv(&value);
            }
        }
        request
    }

    /// Reads the troubleshooting cookie out of a `Cookie` header value.
    pub fn with_cookie_header(mut self, header: &str) -> Self {
        self.cookie_token = parse_cookie_header(header)
            .into_iter()
            .find(|(name, _)| name == TROUBLESHOOT_COOKIE_NAME)
            .and_then(|(_, value)| non_empty(&value));
        self
    }

    pub fn with_client_address(mut self, client_address: impl Into<String>) -> Self {
        self.client_address = non_empty(&client_address.into());
        self
    }

    /// Token this request presents: the query parameter wins; otherwise the
    /// session cookie, bound to the client address when one is known.
    pub fn presented_token(&self) -> Option<String> {
        if let Some(token) = &self.query_token {
            return Some(token.clone());
        }
        let cookie = self.cookie_token.as_deref()?;
        Some(match self.client_address.as_deref() {
            Some(address) => client_bound_token(cookie, address),
            None => cookie.to_string(),
        })
    }
}

/// Splits a `Cookie` header into name/value pairs, skipping malformed parts.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
