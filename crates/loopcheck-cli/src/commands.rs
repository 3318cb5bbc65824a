use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use loopcheck_installer::{InstallOutcome, LocalShimFilesystem, ShimInstaller, WritableDirectoryCredentials};
use loopcheck_probe::{
    BasicAuthCredentials, HttpLoopbackProber, InboundRequestContext, LoopbackProbeConfig,
    ProbeResult,
};
use loopcheck_shim::{BootstrapHook, BootstrapRequest, MustLoadDirectory, ShimManifest};
use loopcheck_store::{AllowList, CapabilityTokenStore, SqliteOptionStore};
use loopcheck_troubleshoot::{
    BisectionController, CookiePolicy, ExtensionBisectionReport, HostServices, SessionLifecycle,
    SessionOrigin, SessionStart, StaticExtensionRegistry, StaticPermission,
};
use serde_json::{json, Value};

use crate::cli_args::{Cli, CliCommand};
use crate::host_files::{ensure_shim_source, load_host_registry, FileCookieJar};

/// Rendered result of one command.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommandOutput {
    pub(crate) json: Value,
    pub(crate) text: String,
}

impl CommandOutput {
    fn new(json: Value, text: impl Into<String>) -> Self {
        Self {
            json,
            text: text.into(),
        }
    }

    pub(crate) fn render(&self, as_json: bool) -> Result<String> {
        if as_json {
            serde_json::to_string_pretty(&self.json).context("failed to encode command output")
        } else {
            Ok(self.text.clone())
        }
    }
}

type LocalInstaller = ShimInstaller<LocalShimFilesystem, WritableDirectoryCredentials>;

/// Collaborators resolved from the command line for one invocation.
struct OperatorContext {
    store: SqliteOptionStore,
    installer: LocalInstaller,
    registry: StaticExtensionRegistry,
    cookies: FileCookieJar,
    permissions: StaticPermission,
}

impl OperatorContext {
    fn open(cli: &Cli) -> Result<Self> {
        if let Some(parent) = cli.store_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let store = SqliteOptionStore::open(&cli.store_path)
            .with_context(|| format!("failed to open option store {}", cli.store_path.display()))?;
        Ok(Self {
            store,
            installer: build_installer(cli)?,
            registry: load_host_registry(&cli.host_file)?,
            cookies: FileCookieJar::new(&cli.cookie_file),
            permissions: StaticPermission(true),
        })
    }

    fn host(&self) -> HostServices<'_> {
        HostServices {
            permissions: &self.permissions,
            registry: &self.registry,
            shim: &self.installer,
        }
    }

    fn tokens(&self) -> CapabilityTokenStore<&SqliteOptionStore> {
        CapabilityTokenStore::new(&self.store)
    }

    fn lifecycle(&self) -> SessionLifecycle<'_, &SqliteOptionStore> {
        SessionLifecycle::new(
            self.host(),
            self.tokens(),
            &self.cookies,
            CookiePolicy::default(),
        )
    }

    fn prober(&self, cli: &Cli) -> Result<HttpLoopbackProber> {
        let basic_auth = match (&cli.basic_auth_user, &cli.basic_auth_password) {
            (Some(username), Some(password)) => Some(BasicAuthCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let inbound = InboundRequestContext {
            cookies: self.cookies.request_pairs()?,
            basic_auth,
        };
        HttpLoopbackProber::new(
            LoopbackProbeConfig {
                admin_url: cli.admin_url.clone(),
                timeout_ms: cli.timeout_ms,
                success_status: cli.success_status,
            },
            inbound,
        )
    }
}

fn build_installer(cli: &Cli) -> Result<LocalInstaller> {
    ensure_shim_source(&cli.shim_source)?;
    // Symlinks resolve relative to the link's directory.
    let source = std::fs::canonicalize(&cli.shim_source)
        .with_context(|| format!("failed to resolve shim source {}", cli.shim_source.display()))?;
    Ok(ShimInstaller::new(
        LocalShimFilesystem,
        WritableDirectoryCredentials,
        source,
        absolute_path(&cli.must_load_dir)?,
    ))
}

fn absolute_path(path: &std::path::Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("failed to resolve current directory")?
        .join(path))
}

pub(crate) fn execute(cli: &Cli) -> Result<CommandOutput> {
    match &cli.command {
        CliCommand::InstallShim => install_shim(cli),
        CliCommand::UninstallShim => uninstall_shim(cli),
        CliCommand::Start { allow } => start_session(cli, allow),
        CliCommand::Stop => stop_session(cli),
        CliCommand::Status => status(cli),
        CliCommand::Baseline => {
            let context = OperatorContext::open(cli)?;
            let prober = context.prober(cli)?;
            let mut controller = BisectionController::new(context.host(), context.tokens(), &prober);
            let result = controller.run_baseline()?;
            Ok(probe_output("baseline", &result, Some(controller.report())))
        }
        CliCommand::ProbeExtension { identifier } => {
            let context = OperatorContext::open(cli)?;
            let prober = context.prober(cli)?;
            let mut controller = BisectionController::new(context.host(), context.tokens(), &prober);
            let result = controller.run_single_extension(identifier)?;
            Ok(probe_output(identifier, &result, None))
        }
        CliCommand::ProbeTheme => {
            let context = OperatorContext::open(cli)?;
            let prober = context.prober(cli)?;
            let mut controller = BisectionController::new(context.host(), context.tokens(), &prober);
            let result = controller.run_active_theme()?;
            let label = format!("active theme {}", context.registry.themes.active);
            Ok(probe_output(&label, &result, None))
        }
        CliCommand::Bisect => {
            let context = OperatorContext::open(cli)?;
            let prober = context.prober(cli)?;
            let mut controller = BisectionController::new(context.host(), context.tokens(), &prober);
            controller.run_full_cycle()?;
            let report = controller.report();
            Ok(CommandOutput::new(
                json!({ "phase": controller.phase().as_str(), "report": report }),
                render_report(report),
            ))
        }
        CliCommand::EvaluateRequest {
            query,
            cookie,
            client_address,
        } => evaluate_request(cli, query, cookie.as_deref(), client_address.as_deref()),
    }
}

fn install_outcome_output(outcome: &InstallOutcome) -> Result<CommandOutput> {
    match outcome {
        InstallOutcome::Success { action } => Ok(CommandOutput::new(
            json!(outcome),
            format!("shim: {}", action.as_str()),
        )),
        InstallOutcome::NeedsCredentials { message } | InstallOutcome::Failed { message } => {
            bail!("{message}")
        }
    }
}

fn install_shim(cli: &Cli) -> Result<CommandOutput> {
    let installer = build_installer(cli)?;
    let outcome = installer.ensure_installed();
    install_outcome_output(&outcome)
}

fn uninstall_shim(cli: &Cli) -> Result<CommandOutput> {
    let context = OperatorContext::open(cli)?;
    context.lifecycle().stop()?;
    let outcome = context.installer.uninstall();
    install_outcome_output(&outcome)
}

fn start_session(cli: &Cli, allow: &[String]) -> Result<CommandOutput> {
    let context = OperatorContext::open(cli)?;
    let mut origin = SessionOrigin::new(cli.operator.clone());
    if let Some(address) = &cli.operator_address {
        origin = origin.with_client_address(address.clone());
    }
    let allow_list = allow.iter().cloned().collect::<AllowList>();
    match context.lifecycle().start(&origin, &allow_list)? {
        SessionStart::Started { session } => {
            let text = format!(
                "troubleshooting session started for {}; allowed: {}; cookie saved to {}",
                origin.identity,
                display_allow_list(&session.allow_list),
                cli.cookie_file.display()
            );
            Ok(CommandOutput::new(
                json!({ "status": "started", "session": session }),
                text,
            ))
        }
        SessionStart::NeedsCredentials { message } => bail!("{message}"),
    }
}

fn stop_session(cli: &Cli) -> Result<CommandOutput> {
    let context = OperatorContext::open(cli)?;
    context.lifecycle().stop()?;
    Ok(CommandOutput::new(
        json!({ "status": "stopped" }),
        "troubleshooting session stopped",
    ))
}

fn status(cli: &Cli) -> Result<CommandOutput> {
    let context = OperatorContext::open(cli)?;
    let snapshot = context.lifecycle().snapshot()?;
    let must_load = MustLoadDirectory::new(absolute_path(&cli.must_load_dir)?);
    let installed_version = ShimManifest::load(&must_load.shim_path())
        .ok()
        .map(|manifest| manifest.version);
    let source_version = ShimManifest::load(context.installer.source_path())
        .ok()
        .map(|manifest| manifest.version);

    let text = format!(
        "session: {}\nowner: {}\nallowed: {}\ndefault presentation forced: {}\nshim installed: {}\nshim version: {} (source {})",
        if snapshot.active { "active" } else { "inactive" },
        snapshot.owner.as_deref().unwrap_or("-"),
        display_allow_list(&snapshot.allow_list),
        snapshot.default_presentation_active,
        context.installer.is_installed(),
        installed_version.as_deref().unwrap_or("-"),
        source_version.as_deref().unwrap_or("-"),
    );
    Ok(CommandOutput::new(
        json!({
            "session": snapshot,
            "shim": {
                "installed": context.installer.is_installed(),
                "path": must_load.shim_path(),
                "installed_version": installed_version,
                "source_version": source_version,
            },
        }),
        text,
    ))
}

fn evaluate_request(
    cli: &Cli,
    query: &str,
    cookie: Option<&str>,
    client_address: Option<&str>,
) -> Result<CommandOutput> {
    let context = OperatorContext::open(cli)?;
    let mut request = BootstrapRequest::from_query(query);
    if let Some(cookie) = cookie {
        request = request.with_cookie_header(cookie);
    }
    if let Some(address) = client_address {
        request = request.with_client_address(address);
    }

    let must_load = MustLoadDirectory::new(absolute_path(&cli.must_load_dir)?);
    let hook = BootstrapHook::new(context.tokens());
    let plan = must_load.plan_bootstrap(
        &hook,
        &request,
        &context.registry.extensions,
        &context.registry.themes,
    );
    let slugs = plan
        .extensions
        .iter()
        .map(|extension| extension.slug.as_str())
        .collect::<Vec<_>>();
    let text = format!(
        "policy: {}\nextensions: {}\ntheme: {}",
        plan.policy.as_str(),
        if slugs.is_empty() {
            "(none)".to_string()
        } else {
            slugs.join(", ")
        },
        plan.theme
    );
    Ok(CommandOutput::new(
        json!({
            "policy": plan.policy.as_str(),
            "extensions": slugs,
            "theme": plan.theme,
            "default_presentation": plan.policy.forces_default_presentation(),
            "shim_version": plan.shim_version,
        }),
        text,
    ))
}

fn probe_output(
    label: &str,
    result: &ProbeResult,
    report: Option<&ExtensionBisectionReport>,
) -> CommandOutput {
    let outcome = result.to_outcome();
    let mut value = json!({ "target": label, "result": result, "outcome": outcome });
    if let Some(report) = report {
        value["report"] = json!(report);
    }
    CommandOutput::new(
        value,
        format!("{label}: {} - {}", result.status.as_str(), result.detail),
    )
}

fn render_report(report: &ExtensionBisectionReport) -> String {
    let mut lines = Vec::with_capacity(report.entries().len() + 1);
    for entry in report.entries() {
        let status = entry
            .verdict
            .result()
            .map(|result| result.status.as_str())
            .unwrap_or("pending");
        lines.push(format!("{:<40} {status}", entry.display_name));
    }
    let suspects = report
        .suspects()
        .iter()
        .map(|entry| entry.identifier.as_str())
        .collect::<Vec<_>>();
    if suspects.is_empty() {
        lines.push("no extension broke the loopback request".to_string());
    } else {
        lines.push(format!("suspects: {}", suspects.join(", ")));
    }
    lines.join("\n")
}

fn display_allow_list(allow_list: &AllowList) -> String {
    if allow_list.is_empty() {
        "(none)".to_string()
    } else {
        allow_list.to_csv()
    }
}
