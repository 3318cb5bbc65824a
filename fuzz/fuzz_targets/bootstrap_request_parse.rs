#![no_main]

use libfuzzer_sys::fuzz_target;
use loopcheck_shim::{parse_cookie_header, resolve_loading_policy, BootstrapRequest, LoadingPolicy};
use loopcheck_store::AllowList;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let (query, cookie) = raw.split_once('\n').unwrap_or((&*raw, ""));

    for (name, _) in parse_cookie_header(cookie) {
        assert!(!name.is_empty());
        assert_eq!(name.trim(), name);
    }

    let request = BootstrapRequest::from_query(query)
        .with_cookie_header(cookie)
        .with_client_address("127.0.0.1");
    if let Some(token) = request.query_token.as_deref() {
        assert!(!token.is_empty());
    }
    assert!(!request.requested_allow_list.iter().any(str::is_empty));

    let presented = request.presented_token();
    let stored = AllowList::single("akismet");
    match resolve_loading_policy(Some("live-token"), presented.as_deref(), &stored, false) {
        LoadingPolicy::AllowListed { allow_list, .. } => {
            assert_eq!(presented.as_deref(), Some("live-token"));
            assert_eq!(allow_list, stored);
        }
        LoadingPolicy::Isolated => {}
        LoadingPolicy::Unrestricted => panic!("stored token present but policy unrestricted"),
    }
});
