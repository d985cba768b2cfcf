//! Fuzz target for command-line rewriting.

#![no_main]

use arbitrary::Arbitrary;
use jr_core::classify::AgentDescriptor;
use jr_core::rewrite::build_command_line;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    argv: Vec<String>,
    agents: Vec<(String, Option<String>)>,
}

fuzz_target!(|input: Input| {
    let agents: Vec<AgentDescriptor> = input
        .agents
        .into_iter()
        .map(|(path, opts)| match opts {
            Some(o) => AgentDescriptor::new(path).with_options(o),
            None => AgentDescriptor::new(path),
        })
        .collect();
    let out = build_command_line(&input.argv, &agents);
    assert_eq!(out.len(), input.argv.len() + agents.len());
});
