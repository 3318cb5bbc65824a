use loopcheck_probe::{LoopbackProber, ProbeResult};
use loopcheck_shim::extension_slug;
use loopcheck_store::{AllowList, BisectionToken, CapabilityTokenStore, OptionStore};
use serde::Serialize;

use crate::{ExtensionBisectionReport, HostServices, TroubleshootError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "extension", rename_all = "snake_case")]
/// Progress of one bisection cycle.
pub enum CyclePhase {
    Idle,
    BaselineRequested,
    BaselinePending,
    BaselineComplete,
    PerExtensionPending(String),
    CycleComplete,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::BaselineRequested => "baseline_requested",
            CyclePhase::BaselinePending => "baseline_pending",
            CyclePhase::BaselineComplete => "baseline_complete",
            CyclePhase::PerExtensionPending(_) => "per_extension_pending",
            CyclePhase::CycleComplete => "cycle_complete",
        }
    }
}

/// Drives loopback probes under narrowing contexts: none of the extensions,
/// then one extension at a time.
///
/// Every probe gets a freshly generated token, so only the newest one is
/// ever live in the store.
pub struct BisectionController<'a, S> {
    host: HostServices<'a>,
    tokens: CapabilityTokenStore<S>,
    prober: &'a dyn LoopbackProber,
    phase: CyclePhase,
    report: ExtensionBisectionReport,
}

impl<'a, S: OptionStore> BisectionController<'a, S> {
    pub fn new(
        host: HostServices<'a>,
        tokens: CapabilityTokenStore<S>,
        prober: &'a dyn LoopbackProber,
    ) -> Self {
        Self {
            host,
            tokens,
            prober,
            phase: CyclePhase::Idle,
            report: ExtensionBisectionReport::default(),
        }
    }

    pub fn phase(&self) -> &CyclePhase {
        &self.phase
    }

    pub fn report(&self) -> &ExtensionBisectionReport {
        &self.report
    }

    pub fn into_report(self) -> ExtensionBisectionReport {
        self.report
    }

    /// Probes with no extensions and the default presentation forced, then
    /// seeds the report with every active extension and the active theme
    /// pending.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn run_baseline(&mut self) -> Result<ProbeResult, TroubleshootError> {
        let previous = std::mem::replace(&mut self.phase, CyclePhase::BaselineRequested);
        if let Err(error) = self.preflight() {
            self.phase = previous;
            return Err(error);
        }

        self.phase = CyclePhase::BaselinePending;
        let result = self.probe_with_default_presentation(&AllowList::empty());
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                self.phase = previous;
                return Err(error);
            }
        };

        let registry = self.host.registry;
        self.report = ExtensionBisectionReport::seeded(
            result.clone(),
            &registry.list_active_extensions(),
            &registry.list_themes(),
        );
        self.phase = CyclePhase::BaselineComplete;
        tracing::info!(status = result.status.as_str(), "baseline loopback probe finished");
        Ok(result)
    }

    /// Probes with only `identifier` allowed to load. `dir/file` identifiers
    /// are reduced to their slug. Callable in any order, any number of times.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn run_single_extension(&mut self, identifier: &str) -> Result<ProbeResult, TroubleshootError> {
        let slug = extension_slug(identifier);
        self.preflight()?;

        self.phase = CyclePhase::PerExtensionPending(slug.clone());
        let result = self.probe_fresh(&AllowList::single(slug.as_str()));
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                self.settle_phase();
                return Err(error);
            }
        };

        if !self.report.record_extension(&slug, result.clone()) {
            tracing::debug!(slug = %slug, "probed extension has no report row");
        }
        self.settle_phase();
        tracing::info!(
            slug = %slug,
            status = result.status.as_str(),
            "single extension loopback probe finished"
        );
        Ok(result)
    }

    /// Probes the active theme with no extensions loaded.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn run_active_theme(&mut self) -> Result<ProbeResult, TroubleshootError> {
        self.preflight()?;
        let result = self.probe_fresh(&AllowList::empty())?;
        self.report.record_theme(result.clone());
        self.settle_phase();
        tracing::info!(status = result.status.as_str(), "active theme loopback probe finished");
        Ok(result)
    }

    /// Baseline, then every active extension in registry order, then the
    /// active theme. The phase only reaches `CycleComplete` once every report
    /// row holds a verdict.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn run_full_cycle(&mut self) -> Result<&ExtensionBisectionReport, TroubleshootError> {
        self.run_baseline()?;
        let extensions = self.host.registry.list_active_extensions();
        for extension in &extensions {
            self.run_single_extension(&extension.slug)?;
        }
        self.run_active_theme()?;
        self.settle_phase();
        if self.phase != CyclePhase::CycleComplete {
            tracing::warn!(
                pending = self.report.pending_count(),
                "bisection cycle left report rows without a verdict"
            );
        }
        tracing::info!(
            extensions = extensions.len(),
            suspects = self.report.suspects().len(),
            "bisection cycle complete"
        );
        Ok(&self.report)
    }

    fn preflight(&self) -> Result<(), TroubleshootError> {
        if !self.host.permissions.current_user_can_view_diagnostics() {
            return Err(TroubleshootError::PermissionDenied);
        }
        match TroubleshootError::from_install_outcome(self.host.shim.ensure_installed()) {
            Some(error) => {
                tracing::warn!(%error, "shim not ready; probe skipped");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn probe_fresh(&self, allow_list: &AllowList) -> Result<ProbeResult, TroubleshootError> {
        let token = BisectionToken::generate();
        self.tokens.persist_token(&token, allow_list)?;
        Ok(self.prober.probe(&token, allow_list))
    }

    /// The presentation flag is cleared even when persisting or probing fails.
    fn probe_with_default_presentation(
        &self,
        allow_list: &AllowList,
    ) -> Result<ProbeResult, TroubleshootError> {
        let token = BisectionToken::generate();
        let outcome = self
            .tokens
            .persist_token(&token, allow_list)
            .and_then(|()| self.tokens.set_default_presentation(true))
            .map(|()| self.prober.probe(&token, allow_list));
        let cleared = self.tokens.set_default_presentation(false);
        let result = outcome?;
        cleared?;
        Ok(result)
    }

    fn settle_phase(&mut self) {
        self.phase = if self.report.is_complete() {
            CyclePhase::CycleComplete
        } else if self.report.baseline().is_some() {
            CyclePhase::BaselineComplete
        } else {
            CyclePhase::Idle
        };
    }
}

impl<S> std::fmt::Debug for BisectionController<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BisectionController")
            .field("phase", &self.phase)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}
