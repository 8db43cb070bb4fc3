//! Fuzz the response cleaner and the two array readers built on it.
//!
//! Run with: cargo +nightly fuzz run cleaner_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use sheetmem_parse::{clean_api_response, parse_action_array, parse_rebuild_tables, CleanOptions};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = clean_api_response(input, &CleanOptions::default());
        let _ = parse_action_array(input);
        if let Ok(tables) = parse_rebuild_tables(input) {
            for table in &tables {
                assert!(table.content.iter().all(|row| row.len() == table.columns.len()));
            }
        }
    }
});
