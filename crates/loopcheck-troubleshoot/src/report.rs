use loopcheck_probe::{ProbeResult, SiteHealthOutcome};
use loopcheck_shim::{extension_slug, ExtensionDescriptor, ThemeSelection};
use serde::{Deserialize, Serialize};

pub const BASELINE_ENTRY_IDENTIFIER: &str = "baseline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ReportEntryKind` values.
pub enum ReportEntryKind {
    Baseline,
    Extension,
    Theme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "result", rename_all = "snake_case")]
/// Per-entry verdict; entries start pending.
pub enum Verdict {
    Pending,
    Completed(ProbeResult),
}

impl Verdict {
    pub fn is_pending(&self) -> bool {
        matches!(self, Verdict::Pending)
    }

    pub fn result(&self) -> Option<&ProbeResult> {
        match self {
            Verdict::Pending => None,
            Verdict::Completed(result) => Some(result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One row of the bisection report.
pub struct ReportEntry {
    pub kind: ReportEntryKind,
    pub identifier: String,
    pub display_name: String,
    pub verdict: Verdict,
}

impl ReportEntry {
    pub fn outcome(&self) -> Option<SiteHealthOutcome> {
        self.verdict.result().map(ProbeResult::to_outcome)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Ordered results of one bisection cycle: baseline, then each active
/// extension in registry order, then the active theme.
pub struct ExtensionBisectionReport {
    entries: Vec<ReportEntry>,
}

impl ExtensionBisectionReport {
    /// Report with a completed baseline and every other row pending.
    pub fn seeded(
        baseline: ProbeResult,
        extensions: &[ExtensionDescriptor],
        themes: &ThemeSelection,
    ) -> Self {
        let mut entries = Vec::with_capacity(extensions.len() + 2);
        entries.push(ReportEntry {
            kind: ReportEntryKind::Baseline,
            identifier: BASELINE_ENTRY_IDENTIFIER.to_string(),
            display_name: "No extensions, default presentation".to_string(),
            verdict: Verdict::Completed(baseline),
        });
        entries.extend(extensions.iter().map(|extension| ReportEntry {
            kind: ReportEntryKind::Extension,
            identifier: extension_slug(&extension.slug),
            display_name: extension.name.clone(),
            verdict: Verdict::Pending,
        }));
        entries.push(ReportEntry {
            kind: ReportEntryKind::Theme,
            identifier: themes.active.clone(),
            display_name: format!("Active theme: {}", themes.active),
            verdict: Verdict::Pending,
        });
        Self { entries }
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn baseline(&self) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == ReportEntryKind::Baseline)
    }

    pub fn extension(&self, slug: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == ReportEntryKind::Extension && entry.identifier == slug)
    }

    pub fn theme(&self) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == ReportEntryKind::Theme)
    }

    /// Records a per-extension verdict. Returns false for unlisted slugs.
    pub fn record_extension(&mut self, slug: &str, result: ProbeResult) -> bool {
        self.record(ReportEntryKind::Extension, Some(slug), result)
    }

    pub fn record_theme(&mut self, result: ProbeResult) -> bool {
        self.record(ReportEntryKind::Theme, None, result)
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.verdict.is_pending())
            .count()
    }

    pub fn is_complete(&self) -> bool {
        !self.entries.is_empty() && self.pending_count() == 0
    }

    /// Extensions whose probe did not come back healthy.
    pub fn suspects(&self) -> Vec<&ReportEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == ReportEntryKind::Extension)
            .filter(|entry| {
                entry
                    .verdict
                    .result()
                    .is_some_and(|result| !result.is_healthy())
            })
            .collect()
    }

    fn record(&mut self, kind: ReportEntryKind, identifier: Option<&str>, result: ProbeResult) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|entry| {
            entry.kind == kind && identifier.map_or(true, |identifier| entry.identifier == identifier)
        }) else {
            return false;
        };
        entry.verdict = Verdict::Completed(result);
        true
    }
}
