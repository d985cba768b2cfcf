//! Property-based tests for command-line rewriting invariants:
//! length, placement, order preservation and determinism.

use jr_core::classify::AgentDescriptor;
use jr_core::rewrite::{build_command_line, format_agent_flag};
use proptest::prelude::*;

/// Tokens that can never contain the runtime token.
fn plain_token() -> impl Strategy<Value = String> {
    "[a-hk-uw-z0-9./=_-]{1,12}"
}

fn agent() -> impl Strategy<Value = AgentDescriptor> {
    ("/opt/[a-z]{1,8}\\.jar", proptest::option::of("[a-z]{1,4}=[0-9]{1,3}")).prop_map(
        |(path, opts)| match opts {
            Some(o) => AgentDescriptor::new(path).with_options(o),
            None => AgentDescriptor::new(path),
        },
    )
}

/// An argument vector with the launcher at a known index (or none).
fn argv() -> impl Strategy<Value = (Vec<String>, Option<usize>)> {
    (
        proptest::collection::vec(plain_token(), 0..10),
        proptest::option::of(0usize..10),
    )
        .prop_map(|(mut args, launcher)| {
            let at = launcher.map(|i| i.min(args.len()));
            if let Some(i) = at {
                args.insert(i, "/usr/lib/jvm/bin/java".to_string());
            }
            (args, at)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// One flag per agent is added; nothing is dropped.
    #[test]
    fn length_grows_by_agent_count(
        (args, _) in argv(),
        agents in proptest::collection::vec(agent(), 0..4),
    ) {
        let out = build_command_line(&args, &agents);
        prop_assert_eq!(out.len(), args.len() + agents.len());
    }

    /// Flags sit right after the launcher, or after the first argument when
    /// there is none, in the order given.
    #[test]
    fn flags_are_contiguous_at_split(
        (args, launcher) in argv(),
        agents in proptest::collection::vec(agent(), 1..4),
    ) {
        let out = build_command_line(&args, &agents);
        let split = launcher.map(|i| i + 1).unwrap_or(1).min(args.len());
        let flags: Vec<String> = agents.iter().map(format_agent_flag).collect();
        prop_assert_eq!(&out[split..split + agents.len()], flags.as_slice());
    }

    /// Removing the inserted flags gives back the original vector.
    #[test]
    fn original_order_preserved(
        (args, launcher) in argv(),
        agents in proptest::collection::vec(agent(), 0..4),
    ) {
        let out = build_command_line(&args, &agents);
        let split = launcher.map(|i| i + 1).unwrap_or(1).min(args.len());
        let mut rest = out[..split].to_vec();
        rest.extend_from_slice(&out[split + agents.len()..]);
        prop_assert_eq!(rest, args);
    }

    /// Same input, same output.
    #[test]
    fn deterministic(
        (args, _) in argv(),
        agents in proptest::collection::vec(agent(), 0..4),
    ) {
        prop_assert_eq!(build_command_line(&args, &agents), build_command_line(&args, &agents));
    }

    /// A flag round-trips through the agent parser.
    #[test]
    fn flag_parses_back(a in agent()) {
        let flag = format_agent_flag(&a);
        let parsed = jr_core::classify::parse_agent_param(&flag);
        prop_assert!(parsed.is_some());
        let parsed = parsed.unwrap();
        prop_assert_eq!(parsed.path, a.path);
        prop_assert_eq!(parsed.options, a.options);
    }
}
