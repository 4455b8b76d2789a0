//! Fuzz target for query text normalization.
//!
//! Run with: cargo +nightly fuzz run query_text_fuzz -- -max_total_time=60

#![no_main]

use keystone_core::sanitize_query_text;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let normalized = sanitize_query_text(input);

        // Exactly one terminator, never leading whitespace.
        assert!(normalized.ends_with(';'));
        assert!(!normalized.ends_with(";;"));
        assert!(!normalized.starts_with(char::is_whitespace));
    }
});
