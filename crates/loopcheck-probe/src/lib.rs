//! Loopback prober: issues the application's request to itself and
//! classifies the outcome.
//!
//! Transport failures and unexpected status codes are data here, not errors:
//! every probe yields a [`ProbeResult`].

use loopcheck_store::{AllowList, BisectionToken};
use serde::{Deserialize, Serialize};

mod http;

pub use http::{
    build_probe_url, BasicAuthCredentials, HttpLoopbackProber, InboundRequestContext,
    LoopbackProbeConfig,
};

pub const LOOPBACK_TIMEOUT_MS_DEFAULT: u64 = 10_000;
pub const LOOPBACK_SUCCESS_STATUS_DEFAULT: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Tri-state health verdict of one probe.
pub enum ProbeStatus {
    Healthy,
    Degraded,
    Failed,
}

impl ProbeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeStatus::Healthy => "healthy",
            ProbeStatus::Degraded => "degraded",
            ProbeStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Immutable outcome of a single loopback probe.
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub detail: String,
    pub http_status: Option<u16>,
}

impl ProbeResult {
    pub fn healthy(http_status: u16) -> Self {
        Self {
            status: ProbeStatus::Healthy,
            detail: "The loopback request to your site completed successfully.".to_string(),
            http_status: Some(http_status),
        }
    }

    pub fn degraded(http_status: u16) -> Self {
        Self {
            status: ProbeStatus::Degraded,
            detail: format!(
                "The loopback request returned an unexpected http status code, {http_status}, it was not possible to determine if this will prevent features from working as expected."
            ),
            http_status: Some(http_status),
        }
    }

    pub fn failed(transport_error: &str) -> Self {
        Self {
            status: ProbeStatus::Failed,
            detail: format!(
                "The loopback request to your site failed, this means features relying on them are not currently working as expected. Error encountered: {transport_error}"
            ),
            http_status: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ProbeStatus::Healthy
    }

    /// Maps the verdict to the status vocabulary the operator UI shows.
    pub fn to_outcome(&self) -> SiteHealthOutcome {
        let status = match self.status {
            ProbeStatus::Healthy => SiteHealthStatus::Good,
            ProbeStatus::Degraded => SiteHealthStatus::Recommended,
            ProbeStatus::Failed => SiteHealthStatus::Critical,
        };
        SiteHealthOutcome {
            status,
            message: self.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Enumerates supported `SiteHealthStatus` values.
pub enum SiteHealthStatus {
    Good,
    Recommended,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Discriminated result surfaced for a single probe.
pub struct SiteHealthOutcome {
    pub status: SiteHealthStatus,
    pub message: String,
}

/// Issues one synchronous loopback request. No retries.
pub trait LoopbackProber {
    fn probe(&self, token: &BisectionToken, allow_list: &AllowList) -> ProbeResult;
}

impl<T: LoopbackProber + ?Sized> LoopbackProber for &T {
    fn probe(&self, token: &BisectionToken, allow_list: &AllowList) -> ProbeResult {
        (**self).probe(token, allow_list)
    }
}
