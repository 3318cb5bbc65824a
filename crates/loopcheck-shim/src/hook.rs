use std::path::{Path, PathBuf};

use loopcheck_store::{CapabilityTokenStore, OptionStore, StoreResult};

use crate::{
    resolve_loading_policy, shim_install_path, BootstrapRequest, ExtensionDescriptor,
    LoadingPolicy, ShimManifest, ThemeSelection,
};

/// Troubleshooting hook the host runs first during bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapHook<S> {
    tokens: CapabilityTokenStore<S>,
}

impl<S: OptionStore> BootstrapHook<S> {
    pub fn new(tokens: CapabilityTokenStore<S>) -> Self {
        Self { tokens }
    }

    /// Reads the persisted state once and resolves the request's policy.
    pub fn run(&self, request: &BootstrapRequest) -> StoreResult<LoadingPolicy> {
        let stored = self.tokens.read_token()?;
        if stored.is_none() {
            return Ok(LoadingPolicy::Unrestricted);
        }
        let allow_list = self.tokens.read_allow_list()?;
        let default_presentation = self.tokens.default_presentation()?;
        let presented = request.presented_token();
        let policy = resolve_loading_policy(
            stored.as_ref().map(|token| token.as_str()),
            presented.as_deref(),
            &allow_list,
            default_presentation,
        );
        tracing::debug!(
            policy = policy.as_str(),
            presented_token = presented.is_some(),
            allow_list = %allow_list.to_csv(),
            default_presentation,
            "bootstrap hook resolved loading policy"
        );
        Ok(policy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Extensions and theme a request will load, decided before any of them
/// registers.
pub struct BootstrapPlan {
    pub policy: LoadingPolicy,
    pub extensions: Vec<ExtensionDescriptor>,
    pub theme: String,
    pub shim_version: Option<String>,
}

/// The host's must-load directory, scanned before normal extension loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MustLoadDirectory {
    path: PathBuf,
}

impl MustLoadDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shim_path(&self) -> PathBuf {
        shim_install_path(&self.path)
    }

    pub fn has_shim(&self) -> bool {
        self.shim_path().is_file()
    }

    /// Plans what the request loads. Without the shim file, or when the
    /// persisted state cannot be read, loading is unrestricted.
    pub fn plan_bootstrap<S: OptionStore>(
        &self,
        hook: &BootstrapHook<S>,
        request: &BootstrapRequest,
        extensions: &[ExtensionDescriptor],
        themes: &ThemeSelection,
    ) -> BootstrapPlan {
        let (policy, shim_version) = if self.has_shim() {
            let shim_version = match ShimManifest::load(&self.shim_path()) {
                Ok(manifest) => Some(manifest.version),
                Err(error) => {
                    tracing::warn!(error = %format!("{error:#}"), "shim manifest unreadable");
                    None
                }
            };
            let policy = hook.run(request).unwrap_or_else(|error| {
                tracing::warn!(%error, "troubleshooting state unreadable; loading normally");
                LoadingPolicy::Unrestricted
            });
            (policy, shim_version)
        } else {
            (LoadingPolicy::Unrestricted, None)
        };

        BootstrapPlan {
            extensions: policy.filter_extensions(extensions),
            theme: policy.effective_theme(themes).to_string(),
            policy,
            shim_version,
        }
    }
}
