//! Fuzz the lenient JSON reader. It must return Ok or Err, never panic.
//!
//! Run with: cargo +nightly fuzz run json5_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use sheetmem_parse::json5;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Err(err) = json5::parse(input) {
            assert!(!err.to_string().is_empty());
        }
    }
});
