//! Fuzz target for /proc/[pid]/stat parsing.

#![no_main]

use jr_core::collect::proc_parsers::parse_stat_content;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = parse_stat_content(data);
});
