//! Fuzz target for /proc/[pid]/status parsing.

#![no_main]

use jr_core::collect::proc_parsers::parse_status_content;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = parse_status_content(data);
});
