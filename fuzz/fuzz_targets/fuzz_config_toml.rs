//! Fuzz target for TOML configuration parsing.

#![no_main]

use jr_common::config::ConfigFormat;
use jr_common::Config;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = Config::parse(data, ConfigFormat::Toml);
});
