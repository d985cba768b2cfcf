//! Fuzz target for agent flag parsing.
//!
//! A parsed flag, formatted again, must parse to the same path and options.

#![no_main]

use jr_core::classify::parse_agent_param;
use jr_core::rewrite::format_agent_flag;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Some(agent) = parse_agent_param(data) else {
        return;
    };
    // Empty options format without the `=` and come back as `None`.
    if agent.options.as_deref() == Some("") {
        return;
    }
    let again = parse_agent_param(&format_agent_flag(&agent)).expect("formatted flag parses");
    assert_eq!(again.path, agent.path);
    assert_eq!(again.options, agent.options);
});
