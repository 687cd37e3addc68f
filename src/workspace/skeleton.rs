//! Starter files for a fresh workspace.

use serde_json::json;
use tracing::{debug, warn};

use crate::backend::EntryKind;
use crate::files::FileGateway;

use super::WorkspaceTarget;

const DIRECTORIES: &[&str] = &["src", "public", "docs", "tests", "config", "scripts"];

fn files() -> Vec<(&'static str, String)> {
    let manifest = json!({
        "name": "nook-workspace",
        "version": "1.0.0",
        "description": "Personal workspace",
        "main": "src/index.js",
        "scripts": {
            "start": "node src/index.js",
            "dev": "node --watch src/index.js",
            "test": "echo \"Error: no test specified\" && exit 1",
            "build": "sh scripts/build.sh"
        },
        "license": "MIT"
    });

    vec![
        ("README.md", "# Welcome to your workspace\n".to_string()),
        ("src/index.js", "console.log('Hello, World!');\n".to_string()),
        (
            "public/index.html",
            "<!DOCTYPE html>\n<html>\n<head><title>My Project</title></head>\n\
             <body><h1>Hello World</h1></body>\n</html>\n"
                .to_string(),
        ),
        ("docs/README.md", "# Project Documentation\n".to_string()),
        (
            "scripts/build.sh",
            "#!/bin/sh\necho \"Build script\"\n".to_string(),
        ),
        (
            "package.json",
            serde_json::to_string_pretty(&manifest).unwrap_or_default() + "\n",
        ),
    ]
}

/// Seed the skeleton through the gateway. Failures are logged and
/// counted, never raised.
pub(super) async fn seed(gateway: &FileGateway, target: &WorkspaceTarget) -> usize {
    let mut failures = 0;

    for dir in DIRECTORIES {
        let path = format!("{}/{dir}", target.workspace.root);
        if let Err(e) = gateway
            .create_entry(target, &path, EntryKind::Directory, None)
            .await
        {
            warn!("Failed to seed {}: {}", path, e);
            failures += 1;
        }
    }

    for (name, content) in files() {
        let path = format!("{}/{name}", target.workspace.root);
        if let Err(e) = gateway.write_file(target, &path, &content).await {
            warn!("Failed to seed {}: {}", path, e);
            failures += 1;
        }
    }

    debug!(
        "Seeded workspace {} ({} failures)",
        target.workspace.id, failures
    );
    failures
}
