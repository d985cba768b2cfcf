//! Fuzz target for /proc/[pid]/environ parsing.

#![no_main]

use jr_core::collect::proc_parsers::{parse_environ_content, parse_environ_raw};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let lossy = parse_environ_content(data);
    let raw = parse_environ_raw(data);
    // Lossy decoding can merge keys, never split them.
    assert!(lossy.len() <= raw.len());
});
