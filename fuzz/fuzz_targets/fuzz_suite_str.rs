#![no_main]
use libfuzzer_sys::fuzz_target;

/// Fuzz the format-detecting suite entry point (XML or JSON).
fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = mdqa::serialize::suite_from_str(s);
    }
});
