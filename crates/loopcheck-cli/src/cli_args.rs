use std::path::PathBuf;

use clap::{Parser, Subcommand};
use loopcheck_probe::{LOOPBACK_SUCCESS_STATUS_DEFAULT, LOOPBACK_TIMEOUT_MS_DEFAULT};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_http_status(value: &str) -> Result<u16, String> {
    let parsed = value
        .parse::<u16>()
        .map_err(|error| format!("failed to parse status code: {error}"))?;
    if !(100..=599).contains(&parsed) {
        return Err("value must be in range 100..=599".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "loopcheck",
    about = "Diagnose and isolate extensions that break an application's loopback requests",
    version
)]
/// Operator command line for loopcheck.
pub struct Cli {
    #[arg(
        long = "admin-url",
        env = "LOOPCHECK_ADMIN_URL",
        global = true,
        default_value = "http://127.0.0.1/admin/",
        help = "Administrative entry point loopback probes are sent to."
    )]
    pub admin_url: String,

    #[arg(
        long = "store-path",
        env = "LOOPCHECK_STORE_PATH",
        global = true,
        default_value = ".loopcheck/options.sqlite",
        help = "SQLite option store shared with the host's bootstrap."
    )]
    pub store_path: PathBuf,

    #[arg(
        long = "must-load-dir",
        env = "LOOPCHECK_MUST_LOAD_DIR",
        global = true,
        default_value = ".loopcheck/must-load",
        help = "Directory the host scans before loading extensions."
    )]
    pub must_load_dir: PathBuf,

    #[arg(
        long = "shim-source",
        env = "LOOPCHECK_SHIM_SOURCE",
        global = true,
        default_value = ".loopcheck/shim/loopcheck-shim.toml",
        help = "Canonical shim file. Written from the bundled copy when missing."
    )]
    pub shim_source: PathBuf,

    #[arg(
        long = "host-file",
        env = "LOOPCHECK_HOST_FILE",
        global = true,
        default_value = ".loopcheck/host.json",
        help = "JSON description of active extensions and themes."
    )]
    pub host_file: PathBuf,

    #[arg(
        long = "cookie-file",
        env = "LOOPCHECK_COOKIE_FILE",
        global = true,
        default_value = ".loopcheck/cookies.json",
        help = "Operator cookie jar. Its cookies are forwarded on every probe."
    )]
    pub cookie_file: PathBuf,

    #[arg(
        long = "timeout-ms",
        env = "LOOPCHECK_TIMEOUT_MS",
        global = true,
        default_value_t = LOOPBACK_TIMEOUT_MS_DEFAULT,
        value_parser = parse_positive_u64,
        help = "Timeout for a single loopback probe."
    )]
    pub timeout_ms: u64,

    #[arg(
        long = "success-status",
        env = "LOOPCHECK_SUCCESS_STATUS",
        global = true,
        default_value_t = LOOPBACK_SUCCESS_STATUS_DEFAULT,
        value_parser = parse_http_status,
        help = "HTTP status treated as a healthy loopback response."
    )]
    pub success_status: u16,

    #[arg(
        long = "basic-auth-user",
        env = "LOOPCHECK_BASIC_AUTH_USER",
        global = true,
        requires = "basic_auth_password"
    )]
    pub basic_auth_user: Option<String>,

    #[arg(
        long = "basic-auth-password",
        env = "LOOPCHECK_BASIC_AUTH_PASSWORD",
        global = true,
        hide_env_values = true,
        requires = "basic_auth_user"
    )]
    pub basic_auth_password: Option<String>,

    #[arg(
        long,
        env = "LOOPCHECK_OPERATOR",
        global = true,
        default_value = "operator",
        help = "Identity that owns the troubleshooting session."
    )]
    pub operator: String,

    #[arg(
        long = "operator-address",
        env = "LOOPCHECK_OPERATOR_ADDRESS",
        global = true,
        help = "Client address the session cookie is bound to."
    )]
    pub operator_address: Option<String>,

    #[arg(long, global = true, help = "Render results as JSON.")]
    pub json: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Install the shim into the must-load directory, or bring it up to date.
    InstallShim,
    /// Remove the shim and every persisted troubleshooting entry.
    UninstallShim,
    /// Start a troubleshooting session for the operator.
    Start {
        #[arg(long = "allow", value_delimiter = ',', help = "Extensions loaded for the operator.")]
        allow: Vec<String>,
    },
    /// End the troubleshooting session.
    Stop,
    /// Show persisted troubleshooting state and shim installation.
    Status,
    /// Probe with no extensions and the default presentation.
    Baseline,
    /// Probe with only one extension allowed to load.
    ProbeExtension { identifier: String },
    /// Probe the active theme with no extensions.
    ProbeTheme,
    /// Baseline, then every active extension, then the active theme.
    Bisect,
    /// Resolve what the bootstrap shim would load for a request.
    EvaluateRequest {
        #[arg(long, default_value = "", help = "Raw query string of the request.")]
        query: String,
        #[arg(long, help = "Raw Cookie header of the request.")]
        cookie: Option<String>,
        #[arg(long = "client-address", help = "Remote address of the request.")]
        client_address: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_parse_positive_u64_rejects_zero() {
        assert_eq!(parse_positive_u64("250"), Ok(250));
        assert!(parse_positive_u64("0").is_err());
        assert!(parse_positive_u64("soon").is_err());
    }

    #[test]
    fn unit_parse_http_status_enforces_range() {
        assert_eq!(parse_http_status("204"), Ok(204));
        assert!(parse_http_status("99").is_err());
        assert!(parse_http_status("600").is_err());
    }

    #[test]
    fn functional_cli_parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "loopcheck",
            "probe-extension",
            "akismet/akismet.php",
            "--timeout-ms",
            "2500",
            "--json",
        ])
        .expect("parse");
        assert_eq!(cli.timeout_ms, 2_500);
        assert!(cli.json);
        match cli.command {
            CliCommand::ProbeExtension { identifier } => assert_eq!(identifier, "akismet/akismet.php"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn functional_start_accepts_comma_separated_allow_list() {
        let cli = Cli::try_parse_from(["loopcheck", "start", "--allow", "akismet,hello-dolly"])
            .expect("parse");
        match cli.command {
            CliCommand::Start { allow } => assert_eq!(allow, vec!["akismet", "hello-dolly"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn regression_basic_auth_user_requires_password() {
        let error = Cli::try_parse_from(["loopcheck", "baseline", "--basic-auth-user", "admin"])
            .expect_err("missing password");
        assert_eq!(error.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
