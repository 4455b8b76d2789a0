//! Fuzz target for identifier sanitization.
//!
//! Any accepted identifier must come back unchanged and be safe to
//! interpolate; glob escaping must always match its own input literally.
//!
//! Run with: cargo +nightly fuzz run identifier_fuzz -- -max_total_time=60

#![no_main]

use keystone_core::{sanitize_identifier, MAX_IDENTIFIER_LEN};
use keystone_storage::{glob_escape, glob_match};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(name) = sanitize_identifier(input) {
            assert_eq!(name, input, "accepted identifiers are never rewritten");
            assert!(name.len() <= MAX_IDENTIFIER_LEN);
            assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            assert!(!name.starts_with(|c: char| c.is_ascii_digit()));
        }

        assert!(
            glob_match(&glob_escape(input), input),
            "escaped glob must match its literal"
        );
    }
});
