//! Fuzz target for /proc/[pid]/statm parsing.

#![no_main]

use jr_core::collect::proc_parsers::parse_statm_content;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = parse_statm_content(data);
});
