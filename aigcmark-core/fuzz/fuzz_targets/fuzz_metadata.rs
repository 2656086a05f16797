#![no_main]

//! Fuzz target for WatermarkMetadata::from_json_slice()
//!
//! Side-files and backup records are read back from disk; any record that
//! parses must also serialize again.
//!
//! Run with: cargo +nightly fuzz run fuzz_metadata

use aigcmark_core::WatermarkMetadata;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(metadata) = WatermarkMetadata::from_json_slice(data) {
        let _ = metadata.to_json_bytes();
        let _ = metadata.is_empty_text();
    }
});
