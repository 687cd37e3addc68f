use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use super::open;

pub async fn run(home: &Path, owner: &str) -> Result<()> {
    let service = open(home)?;
    if service.remove(owner).await? {
        println!("\n{} Removed workspace of {}", "✓".green(), owner.cyan());
    } else {
        println!("\n{} No workspace found for {}", "ℹ".blue(), owner.cyan());
    }
    Ok(())
}
