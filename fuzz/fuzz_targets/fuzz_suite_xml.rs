#![no_main]
use libfuzzer_sys::fuzz_target;

/// Fuzz XML suite loading.
///
/// Covers root-namespace version detection and every element structure
/// shared by the suite schema versions.
fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = mdqa::serialize::suite_from_xml(s);
    }
});
