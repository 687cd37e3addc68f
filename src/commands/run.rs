//! One-shot execution from the command line.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;

use super::open;
use crate::exec::ExecutionResult;

/// Footer summarising how a run ended.
pub fn format_outcome(result: &ExecutionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "━".repeat(50).dimmed());
    if result.timed_out {
        let _ = writeln!(out, "{} {} timed out and was killed", "✗".red(), result.command);
    } else if result.spawn_failed {
        let _ = writeln!(out, "{} {}", "✗".red(), result.output);
    } else {
        let code = result
            .exit_code
            .map_or_else(|| "unknown".to_string(), |c| c.to_string());
        let marker = if result.success() {
            "✓".green()
        } else {
            "✗".red()
        };
        let _ = writeln!(out, "{} {} exited with {}", marker, result.command, code);
    }
    out
}

/// Run a file, or a command line when `command` is set. Output is printed
/// once the run has finished.
pub async fn run(
    home: &Path,
    owner: &str,
    target: &str,
    command: bool,
    cwd: Option<&str>,
) -> Result<()> {
    let service = open(home)?;
    let result = if command {
        service.run_command(owner, target, cwd).await?
    } else {
        service.run_file(owner, target, cwd).await?
    };

    if !result.spawn_failed {
        print!("{}", result.output);
        if !result.output.is_empty() && !result.output.ends_with('\n') {
            println!();
        }
    }
    print!("{}", format_outcome(&result));

    if !result.success() {
        anyhow::bail!("{} did not succeed", result.command);
    }
    Ok(())
}
