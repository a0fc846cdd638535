#![no_main]
use libfuzzer_sys::fuzz_target;
use mdqa::{Bindings, Dispatcher};
use std::time::Duration;

/// Fuzz both bundled rule interpreters with arbitrary code.
///
/// Every input must come back as a status or an evaluation error within the
/// time budget.
fuzz_target!(|data: &[u8]| {
    if let Ok(code) = std::str::from_utf8(data) {
        let dispatcher = Dispatcher::default().with_timeout(Duration::from_millis(200));
        let bindings = Bindings::new();
        let _ = dispatcher.dispatch("r", &bindings, code);
        let _ = dispatcher.dispatch("ecma", &bindings, code);
    }
});
