//! CLI command implementations.
//!
//! Each submodule implements one nook command. Rendering is kept in pure
//! `format_*` functions so it can be tested without a workspace.

pub mod fs;
pub mod provision;
pub mod remove;
pub mod run;
pub mod serve;
pub mod status;

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tracing::debug;

use crate::config::Config;
use crate::service::WorkspaceService;
use crate::workspace::{Workspace, WorkspaceStatus};

/// Load config from `home` and build the service over real backends.
pub(crate) fn open(home: &Path) -> Result<WorkspaceService> {
    let config = Config::load(home)?;
    debug!("Using nook home {}", home.display());
    Ok(WorkspaceService::new(&config, home))
}

/// Colored status label.
pub(crate) fn status_label(status: WorkspaceStatus) -> colored::ColoredString {
    match status {
        WorkspaceStatus::Active => "active".green().bold(),
        WorkspaceStatus::Provisioning => "provisioning".yellow(),
        WorkspaceStatus::Unavailable => "unavailable".red(),
    }
}

/// Multi-line summary of one workspace record.
pub(crate) fn format_workspace(workspace: &Workspace) -> String {
    let handle = workspace
        .backend_handle
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);
    let lines = [
        format!("  Owner:      {}", workspace.owner_id.cyan()),
        format!("  Workspace:  {}", workspace.id.cyan()),
        format!("  Status:     {}", status_label(workspace.status)),
        format!("  Backend:    {}", workspace.backend_kind.to_string().cyan()),
        format!("  Handle:     {}", handle.dimmed()),
        format!("  Root:       {}", workspace.root.cyan()),
        format!(
            "  Created:    {}",
            workspace
                .created_at
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
                .cyan()
        ),
    ];
    lines.join("\n") + "\n"
}
