//! File operations on a workspace from the command line.

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;
use tokio::io::AsyncReadExt;

use super::open;
use crate::backend::EntryKind;
use crate::files::FileNode;
use crate::path::WORKSPACE_ROOT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    File,
    Directory,
}

impl From<Kind> for EntryKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::File => EntryKind::File,
            Kind::Directory => EntryKind::Directory,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum FsAction {
    /// Show the file tree
    Tree {
        #[arg(default_value = WORKSPACE_ROOT)]
        path: String,

        /// Levels to descend (configured default if omitted)
        #[arg(short, long)]
        depth: Option<usize>,

        /// Print JSON instead of a drawing
        #[arg(long)]
        json: bool,
    },

    /// Print a file
    Read { path: String },

    /// Write a file (content from --content or stdin)
    Write {
        path: String,

        #[arg(short, long)]
        content: Option<String>,
    },

    /// Create a file or directory
    Create {
        path: String,

        #[arg(short, long, value_enum, default_value = "file")]
        kind: Kind,

        /// Initial file content
        #[arg(short, long)]
        content: Option<String>,
    },

    /// Delete a file or directory tree
    Delete { path: String },

    /// Rename within the same directory
    Rename { from: String, to: String },

    /// Move to another location
    Move { from: String, to: String },

    /// Copy a file or directory tree
    Copy { from: String, to: String },
}

/// Draw a tree with box characters, directories marked with a slash.
pub fn format_tree(nodes: &[FileNode]) -> String {
    fn walk(out: &mut String, nodes: &[FileNode], prefix: &str) {
        for (i, node) in nodes.iter().enumerate() {
            let last = i + 1 == nodes.len();
            let branch = if last { "└── " } else { "├── " };
            let name = match node.kind {
                EntryKind::Directory => format!("{}/", node.name).blue().bold().to_string(),
                EntryKind::File if node.executable => node.name.green().to_string(),
                EntryKind::File => node.name.clone(),
            };
            let _ = writeln!(out, "{prefix}{branch}{name}");
            let next = format!("{prefix}{}", if last { "    " } else { "│   " });
            walk(out, &node.children, &next);
        }
    }

    let mut out = String::new();
    walk(&mut out, nodes, "");
    out
}

async fn read_stdin() -> Result<String> {
    let mut content = String::new();
    tokio::io::stdin()
        .read_to_string(&mut content)
        .await
        .context("Failed to read content from stdin")?;
    Ok(content)
}

fn done(message: String) {
    println!("{} {}", "✓".green(), message);
}

pub async fn run(home: &Path, owner: &str, action: FsAction) -> Result<()> {
    let service = open(home)?;

    match action {
        FsAction::Tree { path, depth, json } => {
            let tree = service.get_tree(owner, &path, depth).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                println!("{}", path.blue().bold());
                print!("{}", format_tree(&tree));
            }
        }
        FsAction::Read { path } => {
            print!("{}", service.read_file(owner, &path).await?);
        }
        FsAction::Write { path, content } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin().await?,
            };
            service.write_file(owner, &path, &content).await?;
            done(format!("Wrote {} bytes to {}", content.len(), path.cyan()));
        }
        FsAction::Create {
            path,
            kind,
            content,
        } => {
            service
                .create_entry(owner, &path, kind.into(), content.as_deref())
                .await?;
            done(format!("Created {}", path.cyan()));
        }
        FsAction::Delete { path } => {
            service.delete_entry(owner, &path).await?;
            done(format!("Deleted {}", path.cyan()));
        }
        FsAction::Rename { from, to } => {
            service.rename_entry(owner, &from, &to).await?;
            done(format!("Renamed {} to {}", from.cyan(), to.cyan()));
        }
        FsAction::Move { from, to } => {
            service.move_entry(owner, &from, &to).await?;
            done(format!("Moved {} to {}", from.cyan(), to.cyan()));
        }
        FsAction::Copy { from, to } => {
            service.copy_entry(owner, &from, &to).await?;
            done(format!("Copied {} to {}", from.cyan(), to.cyan()));
        }
    }
    Ok(())
}
