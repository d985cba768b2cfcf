//! Fuzz target for YAML configuration parsing and validation.

#![no_main]

use jr_common::config::ConfigFormat;
use jr_common::Config;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(config) = Config::parse(data, ConfigFormat::Yaml) {
        let _ = config.validate();
    }
});
