//! CLI front door (component I).
//!
//! A single-purpose filter, not a many-subcommand tool: `clap` derives a
//! flat `Cli` struct with `-f`/`--file`, `-d`/`--debug`, and the built-in
//! `-h`/`--help`/`-V`/`--version`. Flag parsing, configuration loading, and
//! the tokenize → rewrite → flush pipeline all live here; everything else
//! is owned by `config`, `dump`, `engine`, `json_rewrite`, and `hash`.

mod config;
mod diagnostics;
mod dump;
mod engine;
mod exit_codes;
mod hash;
mod json_rewrite;
#[cfg(feature = "scripting")]
mod script;
mod sql_escape;

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use config::ConfigRoot;

/// Matches the original tool's `OUT_BUFFER_SIZE`.
const OUTPUT_BUFFER_CAPACITY: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "anonymizer")]
#[command(version)]
#[command(about = "Streaming anonymizer for MySQL/MariaDB logical dumps")]
#[command(
    long_about = "Reads a MySQL/MariaDB logical dump on stdin, rewrites selected INSERT \
                   field values according to a TOML configuration, and writes the \
                   anonymized dump to stdout."
)]
struct Cli {
    /// Path to the TOML configuration file (required).
    #[arg(short = 'f', long = "file", value_name = "CONFIG")]
    file: Option<PathBuf>,

    /// Trace each recognized token/statement to stderr.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(config_path) = cli.file else {
        eprintln!("anonymizer: missing required argument -f/--file <CONFIG>");
        return ExitCode::from(exit_codes::INVOCATION_ERROR as u8);
    };

    let config = match ConfigRoot::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("anonymizer: {e:#}");
            return ExitCode::from(exit_codes::CONFIG_ERROR as u8);
        }
    };

    #[cfg(feature = "scripting")]
    let scripts = match load_scripts(&config) {
        Ok(scripts) => scripts,
        Err(e) => {
            eprintln!("anonymizer: {e:#}");
            return ExitCode::from(exit_codes::CONFIG_ERROR as u8);
        }
    };

    let secret = config.secret.clone();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut output = BufWriter::with_capacity(OUTPUT_BUFFER_CAPACITY, stdout.lock());

    let total_start = Instant::now();
    let run_result = dump::rewriter::run(
        stdin.lock(),
        &mut output,
        &config,
        &secret,
        cli.debug,
        #[cfg(feature = "scripting")]
        scripts.as_ref(),
    );
    let total_elapsed = total_start.elapsed();

    let stats = match run_result {
        Ok(stats) => stats,
        Err(e) => {
            // Flush whatever was already written before reporting failure;
            // partial output is never rolled back.
            let _ = output.flush();
            eprintln!("anonymizer: {e:#}");
            return ExitCode::from(exit_codes::DUMP_PARSE_ERROR as u8);
        }
    };

    if let Err(e) = output.flush() {
        eprintln!("anonymizer: failed to flush output: {e}");
        return ExitCode::from(exit_codes::DUMP_PARSE_ERROR as u8);
    }

    if config.stats {
        print!(
            "{}",
            diagnostics::render_stats(
                &config,
                total_elapsed.as_millis(),
                stats.anonymize_time.as_millis(),
            )
        );
    }
    diagnostics::report_unused_rules(&config);

    ExitCode::from(exit_codes::SUCCESS as u8)
}

#[cfg(feature = "scripting")]
fn load_scripts(config: &ConfigRoot) -> anyhow::Result<Option<script::ScriptEngine>> {
    use anyhow::Context;

    match (&config.script_dir, &config.script_module) {
        (Some(dir), Some(module)) => {
            let engine = script::ScriptEngine::load(dir, module, &config.secret)
                .with_context(|| format!("loading script module {module}"))?;
            Ok(Some(engine))
        }
        _ => Ok(None),
    }
}
