#![no_main]

//! Fuzz target for the metadata trailer scanner.
//!
//! Image files are attacker-controlled, so scanning for the marker and
//! parsing whatever follows must never panic.
//!
//! Run with: cargo +nightly fuzz run fuzz_trailer

use aigcmark_core::redundancy::{find_trailer, parse_trailer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(payload) = find_trailer(data) {
        assert!(payload.len() < data.len());
    }
    let _ = parse_trailer(data);
});
