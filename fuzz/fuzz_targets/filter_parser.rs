#![no_main]

use calltrace::filter::FilterPolicy;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing must never panic, whatever the expression
        let _ = FilterPolicy::from_expr(input);
    }
});
