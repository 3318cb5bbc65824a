use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use loopcheck_installer::{GrantedCredentials, LocalShimFilesystem, ShimInstaller};
use loopcheck_probe::{
    HttpLoopbackProber, InboundRequestContext, LoopbackProbeConfig, ProbeStatus,
};
use loopcheck_shim::{
    BootstrapHook, BootstrapRequest, ExtensionDescriptor, MustLoadDirectory, ThemeSelection,
    BUNDLED_SHIM_MANIFEST,
};
use loopcheck_store::{AllowList, CapabilityTokenStore, SqliteOptionStore};
use loopcheck_troubleshoot::{
    BisectionController, CookiePolicy, CyclePhase, HostServices, InMemoryCookieJar,
    ReportEntryKind, SessionLifecycle, SessionOrigin, SessionStart, StaticExtensionRegistry,
    StaticPermission,
};
use serde_json::{json, Value};

const BROKEN_EXTENSION: &str = "broken-plugin";
const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Minimal host application: every request is a fresh "invocation" that opens
/// its own store connection, runs the bootstrap shim and reports what loaded.
/// Loading the broken extension kills the request before any response.
struct FakeHost {
    base_url: String,
    plans: Arc<Mutex<Vec<Value>>>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeHost {
    fn start(store_path: PathBuf, must_load_dir: PathBuf, registry: StaticExtensionRegistry) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake host");
        listener
            .set_nonblocking(true)
            .expect("set nonblocking listener");
        let addr = listener.local_addr().expect("addr");
        let plans = Arc::new(Mutex::new(Vec::new()));
        let plans_thread = Arc::clone(&plans);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || loop {
            if rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    stream
                        .set_nonblocking(false)
                        .expect("blocking stream");
                    let Ok((target, cookie)) = read_request_head(&mut stream) else {
                        continue;
                    };
                    let plan = evaluate_bootstrap(
                        &store_path,
                        &must_load_dir,
                        &registry,
                        &target,
                        cookie.as_deref(),
                        &peer.ip().to_string(),
                    );
                    plans_thread.lock().expect("plans").push(plan.clone());
                    let loads_broken = plan["extensions"]
                        .as_array()
                        .is_some_and(|slugs| slugs.iter().any(|slug| slug == BROKEN_EXTENSION));
                    if loads_broken {
                        drop(stream);
                        continue;
                    }
                    let body = plan.to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.flush();
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(_) => break,
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            plans,
            stop_tx: Some(tx),
            handle: Some(handle),
        }
    }

    fn admin_url(&self) -> String {
        format!("{}/admin/", self.base_url)
    }

    fn recorded_plans(&self) -> Vec<Value> {
        self.plans.lock().expect("plans").clone()
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_request_head(stream: &mut TcpStream) -> std::io::Result<(String, Option<String>)> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    let head = String::from_utf8_lossy(&buffer);
    let mut lines = head.split("\r\n");
    let target = lines
        .next()
        .and_then(|request_line| request_line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let cookie = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("cookie")
            .then(|| value.trim().to_string())
    });
    Ok((target, cookie))
}

fn evaluate_bootstrap(
    store_path: &Path,
    must_load_dir: &Path,
    registry: &StaticExtensionRegistry,
    target: &str,
    cookie: Option<&str>,
    client_address: &str,
) -> Value {
    let store = SqliteOptionStore::open(store_path).expect("host store");
    let hook = BootstrapHook::new(CapabilityTokenStore::new(store));
    let query = target.split_once('?').map(|(_, query)| query).unwrap_or("");
    let mut request = BootstrapRequest::from_query(query).with_client_address(client_address);
    if let Some(cookie) = cookie {
        request = request.with_cookie_header(cookie);
    }
    let plan = MustLoadDirectory::new(must_load_dir).plan_bootstrap(
        &hook,
        &request,
        &registry.extensions,
        &registry.themes,
    );
    json!({
        "policy": plan.policy.as_str(),
        "extensions": plan
            .extensions
            .iter()
            .map(|extension| extension.slug.clone())
            .collect::<Vec<_>>(),
        "theme": plan.theme,
    })
}

fn registry() -> StaticExtensionRegistry {
    StaticExtensionRegistry {
        extensions: vec![
            ExtensionDescriptor::new("akismet/akismet.php", "Akismet"),
            ExtensionDescriptor::new("broken-plugin/broken-plugin.php", "Broken Plugin"),
        ],
        themes: ThemeSelection {
            active: "storefront".to_string(),
            default: "twentytwentyfour".to_string(),
        },
    }
}

struct Workspace {
    _temp: tempfile::TempDir,
    store_path: PathBuf,
    must_load_dir: PathBuf,
    shim_source: PathBuf,
}

fn workspace() -> Workspace {
    let temp = tempfile::tempdir().expect("tempdir");
    let shim_source = temp.path().join("dist").join("loopcheck-shim.toml");
    std::fs::create_dir_all(shim_source.parent().expect("parent")).expect("dist dir");
    std::fs::write(&shim_source, BUNDLED_SHIM_MANIFEST).expect("write shim source");
    Workspace {
        store_path: temp.path().join("options.sqlite"),
        must_load_dir: temp.path().join("must-load"),
        shim_source,
        _temp: temp,
    }
}

fn prober(admin_url: String, cookies: Vec<(String, String)>) -> HttpLoopbackProber {
    HttpLoopbackProber::new(
        LoopbackProbeConfig {
            admin_url,
            timeout_ms: 5_000,
            success_status: 200,
        },
        InboundRequestContext {
            cookies,
            basic_auth: None,
        },
    )
    .expect("prober")
}

fn visitor_get(url: &str, cookie: Option<&str>) -> Result<Value, reqwest::Error> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let mut request = client.get(url);
    if let Some(cookie) = cookie {
        request = request.header("cookie", cookie);
    }
    request.send()?.json::<Value>()
}

#[test]
fn integration_full_cycle_isolates_extension_that_breaks_loopback() {
    let workspace = workspace();
    let host = FakeHost::start(
        workspace.store_path.clone(),
        workspace.must_load_dir.clone(),
        registry(),
    );
    let store = SqliteOptionStore::open(&workspace.store_path).expect("controller store");
    let installer = ShimInstaller::new(
        LocalShimFilesystem,
        GrantedCredentials,
        &workspace.shim_source,
        &workspace.must_load_dir,
    );
    let registry = registry();
    let services = HostServices {
        permissions: &StaticPermission(true),
        registry: &registry,
        shim: &installer,
    };
    let prober = prober(host.admin_url(), Vec::new());
    let mut controller =
        BisectionController::new(services, CapabilityTokenStore::new(&store), &prober);

    let report = controller.run_full_cycle().expect("bisection cycle").clone();

    assert_eq!(controller.phase(), &CyclePhase::CycleComplete);
    assert!(installer.is_installed());
    let verdicts = report
        .entries()
        .iter()
        .map(|entry| {
            (
                entry.kind,
                entry.identifier.clone(),
                entry.verdict.result().map(|result| result.status),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        verdicts,
        vec![
            (ReportEntryKind::Baseline, "baseline".to_string(), Some(ProbeStatus::Healthy)),
            (ReportEntryKind::Extension, "akismet".to_string(), Some(ProbeStatus::Healthy)),
            (ReportEntryKind::Extension, BROKEN_EXTENSION.to_string(), Some(ProbeStatus::Failed)),
            (ReportEntryKind::Theme, "storefront".to_string(), Some(ProbeStatus::Healthy)),
        ]
    );
    let broken = report.extension(BROKEN_EXTENSION).expect("broken row");
    let detail = &broken.verdict.result().expect("result").detail;
    assert!(detail.contains("Error encountered"), "detail: {detail}");
    assert_eq!(report.suspects().len(), 1);

    let plans = host.recorded_plans();
    assert_eq!(plans.len(), 4);
    assert!(plans.iter().all(|plan| plan["policy"] == "allow_listed"));
    assert_eq!(plans[0]["extensions"], json!([]));
    assert_eq!(plans[0]["theme"], "twentytwentyfour");
    assert_eq!(plans[1]["extensions"], json!(["akismet"]));
    assert_eq!(plans[1]["theme"], "storefront");
    assert_eq!(plans[3]["extensions"], json!([]));
    assert_eq!(plans[3]["theme"], "storefront");

    let visitor = visitor_get(&format!("{}/?p=1", host.base_url), None).expect("visitor");
    assert_eq!(visitor["policy"], "isolated");
    assert_eq!(visitor["extensions"], json!([]));
}

#[test]
fn integration_operator_session_is_bound_to_client_and_stop_restores_normal_loading() {
    let workspace = workspace();
    let host = FakeHost::start(
        workspace.store_path.clone(),
        workspace.must_load_dir.clone(),
        registry(),
    );
    let store = SqliteOptionStore::open(&workspace.store_path).expect("operator store");
    let installer = ShimInstaller::new(
        LocalShimFilesystem,
        GrantedCredentials,
        &workspace.shim_source,
        &workspace.must_load_dir,
    );
    let registry = registry();
    let services = HostServices {
        permissions: &StaticPermission(true),
        registry: &registry,
        shim: &installer,
    };
    let jar = InMemoryCookieJar::new();
    let lifecycle = SessionLifecycle::new(
        services,
        CapabilityTokenStore::new(&store),
        &jar,
        CookiePolicy::default(),
    );

    let start = lifecycle
        .start(
            &SessionOrigin::new("admin").with_client_address(LOOPBACK_ADDRESS),
            &AllowList::single("akismet/akismet.php"),
        )
        .expect("start session");
    let session = match start {
        SessionStart::Started { session } => session,
        other => panic!("unexpected start outcome: {other:?}"),
    };
    let cookie = format!(
        "loopcheck-disable-extensions={}",
        session.client_token.as_str()
    );

    let operator = visitor_get(&format!("{}/", host.base_url), Some(&cookie)).expect("operator");
    assert_eq!(operator["policy"], "allow_listed");
    assert_eq!(operator["extensions"], json!(["akismet"]));
    assert_eq!(operator["theme"], "storefront");

    let anonymous = visitor_get(&format!("{}/", host.base_url), None).expect("anonymous");
    assert_eq!(anonymous["policy"], "isolated");
    assert_eq!(anonymous["theme"], "twentytwentyfour");

    // The operator's cookie is forwarded on loopback probes; a probe with a
    // fresh token replaces the session token.
    let prober = prober(host.admin_url(), vec![(
        "loopcheck-disable-extensions".to_string(),
        session.client_token.as_str().to_string(),
    )]);
    let mut controller =
        BisectionController::new(services, CapabilityTokenStore::new(&store), &prober);
    let probe = controller
        .run_single_extension("akismet/akismet.php")
        .expect("single probe");
    assert!(probe.is_healthy());

    lifecycle.stop().expect("stop session");
    let after_stop = visitor_get(&format!("{}/", host.base_url), Some(&cookie));
    assert!(
        after_stop.is_err(),
        "unrestricted loading includes the broken extension and kills the request"
    );
    let plans = host.recorded_plans();
    let last = plans.last().expect("last plan");
    assert_eq!(last["policy"], "unrestricted");
    assert_eq!(last["extensions"], json!(["akismet", BROKEN_EXTENSION]));
}
