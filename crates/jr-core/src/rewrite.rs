//! Command-line rewriter.
//!
//! Inserts agent flags directly after the launcher token. Existing flags are
//! never removed or deduplicated: calling this twice with the same agent
//! yields two flags, so callers gate on [`crate::policy::needs_injection`].

use std::ffi::OsStr;

use crate::classify::{launcher_index, AgentDescriptor};

/// `-javaagent:<path>` with `=<options>` appended when options are non-empty.
pub fn format_agent_flag(agent: &AgentDescriptor) -> String {
    match agent.options.as_deref() {
        Some(opts) if !opts.is_empty() => format!("-javaagent:{}={}", agent.path, opts),
        _ => format!("-javaagent:{}", agent.path),
    }
}

/// Build the new argument vector.
///
/// Everything up to and including the launcher token is copied, then one
/// flag per agent in the order given, then the remaining arguments. Without
/// a launcher the flags go after the first argument; an empty vector yields
/// just the flags.
///
/// Generic over the argument type so raw `OsString` vectors keep their
/// exact bytes through the rewrite.
pub fn build_command_line<A>(original: &[A], agents: &[AgentDescriptor]) -> Vec<A>
where
    A: AsRef<OsStr> + Clone + From<String>,
{
    let mut out = Vec::with_capacity(original.len() + agents.len());
    let split = launcher_index(original)
        .map(|i| i + 1)
        .unwrap_or(1)
        .min(original.len());

    out.extend_from_slice(&original[..split]);
    out.extend(agents.iter().map(|a| A::from(format_agent_flag(a))));
    out.extend_from_slice(&original[split..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jar_launch() {
        let out = build_command_line(
            &argv(&["java", "-jar", "app.jar"]),
            &[AgentDescriptor::new("/opt/agent.jar")],
        );
        assert_eq!(out, argv(&["java", "-javaagent:/opt/agent.jar", "-jar", "app.jar"]));
    }

    #[test]
    fn test_launcher_not_first() {
        let out = build_command_line(
            &argv(&["/usr/bin/env", "JAVA_OPTS=-x", "/opt/jdk/bin/java", "Main"]),
            &[
                AgentDescriptor::new("/a.jar").with_options("k=v"),
                AgentDescriptor::new("/b.jar"),
            ],
        );
        assert_eq!(
            out,
            argv(&[
                "/usr/bin/env",
                "JAVA_OPTS=-x",
                "/opt/jdk/bin/java",
                "-javaagent:/a.jar=k=v",
                "-javaagent:/b.jar",
                "Main",
            ])
        );
    }

    #[test]
    fn test_no_launcher_inserts_after_first() {
        let out = build_command_line(&argv(&["./start", "app.jar"]), &[AgentDescriptor::new("/a.jar")]);
        assert_eq!(out, argv(&["./start", "-javaagent:/a.jar", "app.jar"]));
    }

    #[test]
    fn test_empty_original() {
        let out = build_command_line::<String>(&[], &[AgentDescriptor::new("/a.jar")]);
        assert_eq!(out, argv(&["-javaagent:/a.jar"]));
    }

    #[test]
    fn test_no_deduplication() {
        let agent = AgentDescriptor::new("/a.jar");
        let once = build_command_line(&argv(&["java", "Main"]), std::slice::from_ref(&agent));
        let twice = build_command_line(&once, std::slice::from_ref(&agent));
        assert_eq!(
            twice,
            argv(&["java", "-javaagent:/a.jar", "-javaagent:/a.jar", "Main"])
        );
    }

    #[test]
    fn test_raw_arguments_untouched() {
        use std::ffi::OsString;
        use std::os::unix::ffi::{OsStrExt, OsStringExt};

        let original = vec![
            OsString::from("java"),
            OsString::from_vec(b"-Dname=caf\xe9".to_vec()),
            OsString::from("Main"),
        ];
        let out = build_command_line(&original, &[AgentDescriptor::new("/a.jar")]);
        assert_eq!(out.len(), 4);
        assert_eq!(out[1], OsString::from("-javaagent:/a.jar"));
        assert_eq!(out[2].as_bytes(), b"-Dname=caf\xe9");
        assert_eq!(out[3], original[2]);
    }

    #[test]
    fn test_empty_options_omitted() {
        let mut agent = AgentDescriptor::new("/a.jar");
        agent.options = Some(String::new());
        assert_eq!(format_agent_flag(&agent), "-javaagent:/a.jar");
    }
}
