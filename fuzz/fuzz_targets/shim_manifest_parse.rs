#![no_main]

use libfuzzer_sys::fuzz_target;
use loopcheck_shim::ShimManifest;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(manifest) = ShimManifest::parse(&raw) {
        assert!(!manifest.version.trim().is_empty());
    }
});
