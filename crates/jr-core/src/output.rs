//! Rendering of discovery reports, injection plans and results.
//!
//! All writers take `&mut dyn Write` so the CLI passes stdout and tests
//! pass a `Vec<u8>`. JSON documents are wrapped in an envelope carrying the
//! schema version, run id and generation time; JSONL emits one bare record
//! per line.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::{json, Value};

use jr_common::OutputFormat;

use crate::collect::format_memory;
use crate::inject::{BatchSummary, DiscoveryReport, InjectionPlan, InjectionResult};

/// Version of the JSON envelope.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Column width for the entry point in tables.
const ENTRY_WIDTH: usize = 40;

/// Wrap a payload for `--format json`.
pub fn envelope(command: &str, run_id: &str, payload: Value) -> Value {
    json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": run_id,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "command": command,
        "result": payload,
    })
}

fn write_json(out: &mut dyn Write, value: &Value) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

fn write_jsonl<T: Serialize>(out: &mut dyn Write, records: &[T]) -> io::Result<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut t: String = s.chars().take(width.saturating_sub(3)).collect();
    t.push_str("...");
    t
}

pub fn write_discovery(
    out: &mut dyn Write,
    report: &DiscoveryReport,
    format: OutputFormat,
    run_id: &str,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            let payload = serde_json::to_value(report)?;
            write_json(out, &envelope("list", run_id, payload))
        }
        OutputFormat::Jsonl => write_jsonl(out, &report.processes),
        OutputFormat::Summary => writeln!(
            out,
            "Found {} process(es); scanned {}, skipped {} in {}ms",
            report.processes.len(),
            report.scanned,
            report.skipped,
            report.duration_ms
        ),
        OutputFormat::Table => {
            if report.processes.is_empty() {
                return writeln!(out, "No matching Java processes found");
            }
            writeln!(
                out,
                "{:<8} {:<10} {:<5} {:<10} {:<6} {:<width$} AGENTS",
                "PID",
                "USER",
                "STATE",
                "RSS",
                "JAVA",
                "ENTRY",
                width = ENTRY_WIDTH
            )?;
            for p in &report.processes {
                let agents = if p.agents.is_empty() {
                    "-".to_string()
                } else {
                    p.agents
                        .iter()
                        .map(|a| a.path.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                };
                writeln!(
                    out,
                    "{:<8} {:<10} {:<5} {:<10} {:<6} {:<width$} {}",
                    p.pid(),
                    truncate(&p.snapshot.user, 10),
                    p.snapshot.state,
                    format_memory(p.snapshot.memory.rss_bytes),
                    if p.is_java { "yes" } else { "no" },
                    truncate(p.entry_point().unwrap_or("-"), ENTRY_WIDTH),
                    agents,
                    width = ENTRY_WIDTH
                )?;
            }
            writeln!(
                out,
                "\n{} process(es), {} scanned, {} unreadable",
                report.processes.len(),
                report.scanned,
                report.skipped
            )
        }
    }
}

pub fn write_plans(
    out: &mut dyn Write,
    plans: &[InjectionPlan],
    format: OutputFormat,
    run_id: &str,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            let payload = json!({ "dry_run": true, "plans": plans });
            write_json(out, &envelope("inject", run_id, payload))
        }
        OutputFormat::Jsonl => write_jsonl(out, plans),
        OutputFormat::Summary => writeln!(out, "Dry run: {} process(es) would be restarted", plans.len()),
        OutputFormat::Table => {
            if plans.is_empty() {
                return writeln!(out, "Dry run: nothing to inject");
            }
            for plan in plans {
                writeln!(out, "PID {}", plan.pid)?;
                writeln!(out, "  old: {}", plan.old_command_line.join(" "))?;
                writeln!(out, "  new: {}", plan.new_command_line.join(" "))?;
            }
            Ok(())
        }
    }
}

pub fn write_results(
    out: &mut dyn Write,
    results: &[InjectionResult],
    format: OutputFormat,
    run_id: &str,
) -> io::Result<()> {
    let summary = BatchSummary::from_results(results);
    match format {
        OutputFormat::Json => {
            let payload = json!({ "summary": summary, "results": results });
            write_json(out, &envelope("inject", run_id, payload))
        }
        OutputFormat::Jsonl => write_jsonl(out, results),
        OutputFormat::Summary => write_summary_line(out, &summary),
        OutputFormat::Table => {
            writeln!(
                out,
                "{:<8} {:<8} {:<8} {:<8} MESSAGE",
                "PID", "NEW_PID", "STATUS", "ATTEMPTS"
            )?;
            for r in results {
                let status = match (r.success, r.failure) {
                    (true, _) => "ok".to_string(),
                    (false, Some(kind)) => kind.to_string(),
                    (false, None) => "failed".to_string(),
                };
                let new_pid = if r.new_pid == 0 {
                    "-".to_string()
                } else {
                    r.new_pid.to_string()
                };
                writeln!(
                    out,
                    "{:<8} {:<8} {:<8} {:<8} {}",
                    r.pid, new_pid, status, r.attempts, r.message
                )?;
            }
            writeln!(out)?;
            write_summary_line(out, &summary)
        }
    }
}

fn write_summary_line(out: &mut dyn Write, summary: &BatchSummary) -> io::Result<()> {
    writeln!(
        out,
        "Injected {}/{} ({} failed, {} skipped)",
        summary.succeeded,
        summary.attempted,
        summary.failed,
        summary.skipped
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::AgentDescriptor;
    use crate::inject::FailureKind;
    use crate::mock_process::{java_jar_process, java_main_class_process};
    use chrono::Utc;

    fn report() -> DiscoveryReport {
        DiscoveryReport {
            processes: vec![
                java_jar_process(100, "alice", "/srv/billing.jar"),
                java_main_class_process(200, "root", "com.example.Main", &["-javaagent:/opt/a.jar"]),
            ],
            scanned: 57,
            skipped: 2,
            started_at: Utc::now(),
            duration_ms: 12,
        }
    }

    fn render(f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn result(pid: u32, ok: bool) -> InjectionResult {
        InjectionResult {
            pid,
            success: ok,
            new_pid: if ok { pid + 1 } else { 0 },
            old_command_line: vec!["java".into(), "Main".into()],
            new_command_line: vec!["java".into(), "-javaagent:/a.jar".into(), "Main".into()],
            old_agents: vec![],
            new_agents: if ok { vec![AgentDescriptor::new("/a.jar")] } else { vec![] },
            attempts: 1,
            message: if ok { "restarted".into() } else { "stop timed out".into() },
            failure: if ok { None } else { Some(FailureKind::StopTimeout) },
            error: None,
        }
    }

    #[test]
    fn test_discovery_table() {
        let text = render(|o| write_discovery(o, &report(), OutputFormat::Table, "run-x"));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("PID"));
        assert!(lines[1].starts_with("100"));
        assert!(lines[1].contains("/srv/billing.jar"));
        assert!(lines[1].trim_end().ends_with('-'));
        assert!(lines[2].contains("com.example.Main"));
        assert!(lines[2].contains("/opt/a.jar"));
        assert!(text.contains("57 scanned, 2 unreadable"));
    }

    #[test]
    fn test_discovery_empty_table() {
        let mut empty = report();
        empty.processes.clear();
        let text = render(|o| write_discovery(o, &empty, OutputFormat::Table, "run-x"));
        assert_eq!(text, "No matching Java processes found\n");
    }

    #[test]
    fn test_discovery_json_envelope() {
        let text = render(|o| write_discovery(o, &report(), OutputFormat::Json, "run-x"));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert_eq!(value["run_id"], "run-x");
        assert_eq!(value["command"], "list");
        assert_eq!(value["result"]["scanned"], 57);
        assert_eq!(value["result"]["processes"][0]["pid"], 100);
        assert_eq!(value["result"]["processes"][0]["jar_file"], "/srv/billing.jar");
    }

    #[test]
    fn test_discovery_jsonl_one_line_per_process() {
        let text = render(|o| write_discovery(o, &report(), OutputFormat::Jsonl, "run-x"));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["main_class"], "com.example.Main");
    }

    #[test]
    fn test_results_table_and_summary() {
        let results = vec![result(10, true), result(20, false)];
        let text = render(|o| write_results(o, &results, OutputFormat::Table, "run-x"));
        assert!(text.contains("stop_timeout"));
        assert!(text.contains("Injected 1/2 (1 failed, 0 skipped)"));

        let line = render(|o| write_results(o, &results, OutputFormat::Summary, "run-x"));
        assert_eq!(line, "Injected 1/2 (1 failed, 0 skipped)\n");
    }

    #[test]
    fn test_results_json_has_summary() {
        let results = vec![result(10, true)];
        let text = render(|o| write_results(o, &results, OutputFormat::Json, "run-x"));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["result"]["summary"]["succeeded"], 1);
        assert_eq!(value["result"]["results"][0]["new_pid"], 11);
        assert!(value["result"]["results"][0].get("failure").is_none());
    }

    #[test]
    fn test_plans_table() {
        let plans = vec![InjectionPlan {
            pid: 7,
            agents: vec![AgentDescriptor::new("/a.jar")],
            old_command_line: vec!["java".into(), "Main".into()],
            new_command_line: vec!["java".into(), "-javaagent:/a.jar".into(), "Main".into()],
        }];
        let text = render(|o| write_plans(o, &plans, OutputFormat::Table, "run-x"));
        assert_eq!(
            text,
            "PID 7\n  old: java Main\n  new: java -javaagent:/a.jar Main\n"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
