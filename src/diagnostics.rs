//! Diagnostic formatting: warnings, stats lines, debug tracing.
//!
//! Plain `println!`/`eprintln!` plus `colored` for emphasis rather than a
//! `tracing` layer — this tool is a short-lived filter piped between a dump
//! producer and a destination, not a long-running service.

use colored::Colorize;

use crate::config::{ConfigRoot, TableAction};

/// Format a warning line (not yet printed). Callers choose stdout/stderr.
pub fn warning(message: &str) -> String {
    format!("{} {}", "warning:".yellow().bold(), message)
}

/// Format a success/informational line in green, matching the reference
/// crate's `commands/anonymize.rs` convention for non-error status lines.
pub fn success(message: &str) -> String {
    message.green().to_string()
}

/// Emit a debug trace line to stderr when `-d`/`--debug` is set.
pub fn trace(enabled: bool, message: &str) {
    if enabled {
        eprintln!("{} {}", "debug:".dimmed(), message);
    }
}

/// After end-of-input, warn (to stderr, in table/field insertion order)
/// about every field rule and JSON path spec with zero hits.
pub fn report_unused_rules(config: &ConfigRoot) {
    for table in &config.tables {
        if table.action == TableAction::Truncate {
            continue;
        }
        for field in &table.fields {
            if field.hits.get() == 0 {
                eprintln!(
                    "{}",
                    warning(&format!(
                        "field {}:{} was never anonymized (rule unused)",
                        table.key, field.name
                    ))
                );
            }
            if let crate::config::AnonType::Json { json_paths } = &field.spec {
                for path_spec in json_paths {
                    if path_spec.hits.get() == 0 {
                        eprintln!(
                            "{}",
                            warning(&format!(
                                "field {}:{}, json path '{}' was never anonymized (rule unused)",
                                table.key, field.name, path_spec.path
                            ))
                        );
                    }
                }
            }
        }
    }
}

/// Render the end-of-run `-- `-prefixed statistics block, matching the
/// original tool's SQL-comment-prefixed stdout lines so the stats remain
/// valid SQL if the output is piped straight into a client.
pub fn render_stats(config: &ConfigRoot, total_ms: u128, anonymize_ms: u128) -> String {
    let mut out = String::new();
    out.push_str(&format!("-- Total execution time: {total_ms} ms\n"));
    out.push_str(&format!(
        "-- Time spent for anonymization: {anonymize_ms} ms\n"
    ));

    let mut total_hits: u64 = 0;
    for table in &config.tables {
        for field in &table.fields {
            let hits = field.hits.get();
            if hits > 0 {
                out.push_str(&format!(
                    "-- Field {}:{} anonymized {} time(s)\n",
                    table.key, field.name, hits
                ));
            }
            total_hits += hits;
            if let crate::config::AnonType::Json { json_paths } = &field.spec {
                for path_spec in json_paths {
                    total_hits += path_spec.hits.get();
                }
            }
        }
    }
    out.push_str(&format!(
        "-- TOTAL Number of anonymization(s): {total_hits}\n"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn stats_block_includes_total_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(
            &path,
            r#"
            secret = "s"
            [[tables]]
            key = "users"
            [[tables.fields]]
            name = "email"
            type = "text_hash"
            length = 4
            "#,
        )
        .unwrap();
        let cfg = ConfigRoot::load(Path::new(&path)).unwrap();
        cfg.tables[0].fields[0].hits.set(3);
        let stats = render_stats(&cfg, 10, 2);
        assert!(stats.contains("TOTAL Number of anonymization(s): 3"));
        assert!(stats.contains("Field users:email anonymized 3 time(s)"));
    }
}
