use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use super::{format_workspace, open};
use crate::workspace::WorkspaceStatus;

pub async fn run(home: &Path, owner: &str) -> Result<()> {
    let service = open(home)?;
    let workspace = service.provision(owner).await?;

    let marker = match workspace.status {
        WorkspaceStatus::Active => "✓".green(),
        _ => "!".yellow(),
    };
    println!("\n{} Workspace for {}", marker, owner.cyan());
    print!("{}", format_workspace(&workspace));

    if workspace.status == WorkspaceStatus::Unavailable {
        println!(
            "\n  {} Backend could not be created. It will be retried on next use.",
            "ℹ".blue()
        );
    }
    Ok(())
}
