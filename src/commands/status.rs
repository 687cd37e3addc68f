//! Show stored workspace records without touching any backend.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;

use super::{format_workspace, open, status_label};
use crate::workspace::Workspace;

/// One line per workspace.
pub fn format_table(workspaces: &[Workspace]) -> String {
    let mut out = String::new();
    if workspaces.is_empty() {
        let _ = writeln!(out, "\n{} No workspaces provisioned.", "ℹ".blue());
        let _ = writeln!(out, "  Run {} to create one.", "nook provision".green());
        return out;
    }

    let _ = writeln!(out, "\n{}", "━".repeat(60).dimmed());
    for ws in workspaces {
        let _ = writeln!(
            out,
            "  {:<20} {:<12} {:<10} {}",
            ws.owner_id,
            status_label(ws.status),
            ws.backend_kind.to_string(),
            ws.id.dimmed()
        );
    }
    let _ = writeln!(out, "{}", "━".repeat(60).dimmed());
    out
}

pub async fn run(home: &Path, owner: &str, all: bool) -> Result<()> {
    let service = open(home)?;

    if all {
        print!("{}", format_table(&service.list().await?));
        return Ok(());
    }

    match service.status(owner).await? {
        Some(workspace) => {
            println!("\n{}", "━".repeat(50).dimmed());
            println!("{}", "   Workspace Status".yellow().bold());
            println!("{}", "━".repeat(50).dimmed());
            print!("{}", format_workspace(&workspace));
            println!("{}", "━".repeat(50).dimmed());
        }
        None => {
            println!("\n{} No workspace found for {}.", "ℹ".blue(), owner.cyan());
            println!("  Run {} to create one.", "nook provision".green());
        }
    }
    Ok(())
}
