//! Fuzz `<tableEdit>` extraction and call parsing.
//!
//! Run with: cargo +nightly fuzz run edit_tag_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use sheetmem_parse::{parse_table_edit, strip_message_tags};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = parse_table_edit(input);
        let stripped = strip_message_tags(input);
        assert!(stripped.len() <= input.len());
    }
});
