//! Fuzz target for /proc/[pid]/cmdline splitting followed by classification.

#![no_main]

use jr_core::classify::{extract_agents, infer_entry_point, is_java_process, launcher_index};
use jr_core::collect::proc_parsers::{parse_cmdline_content, parse_cmdline_raw};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let argv = parse_cmdline_content(data);
    let raw = parse_cmdline_raw(data);
    assert_eq!(argv.len(), raw.len());
    assert_eq!(launcher_index(&argv).is_some(), launcher_index(&raw).is_some());

    let _ = is_java_process("", &argv);
    let _ = extract_agents(&argv);
    let entry = infer_entry_point(&argv);
    assert!(entry.jar_file.is_none() || entry.main_class.is_none());
});
