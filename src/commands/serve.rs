//! `nook serve`: JSON-lines RPC over stdin and stdout.
//!
//! Terminal requests are handled inline so one session's input is applied
//! in arrival order. Everything else runs on its own task and replies when
//! done. End of input counts as transport loss: in-flight requests finish,
//! then every session is torn down.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::open;
use crate::backend::TermSize;
use crate::protocol::{ErrorBody, EventEncoder, Op, Reply, Request};
use crate::service::WorkspaceService;
use crate::terminal::TerminalEvent;

/// Lines waiting for stdout before producers block.
const OUTPUT_BUFFER: usize = 1024;

/// Events buffered per session.
const EVENT_BUFFER: usize = 256;

pub async fn run(home: &Path, owner: &str) -> Result<()> {
    let service = Arc::new(open(home)?);
    let (out, lines) = mpsc::channel(OUTPUT_BUFFER);
    let writer = tokio::spawn(write_lines(lines, tokio::io::stdout()));

    info!("Serving requests on stdin (default owner {})", owner);
    serve(service, owner.to_string(), tokio::io::stdin(), out).await?;

    writer
        .await
        .context("Output writer panicked")?
        .context("Failed to write to stdout")
}

async fn write_lines<W>(mut lines: mpsc::Receiver<String>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Read requests until `input` ends, writing replies and events to `out`.
pub(crate) async fn serve<R>(
    service: Arc<WorkspaceService>,
    default_owner: String,
    input: R,
    out: mpsc::Sender<String>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejected request line: {}", e);
                let id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or_default();
                let _ = out
                    .send(Reply::err(id, ErrorBody::invalid_request(e.to_string())).to_line())
                    .await;
                continue;
            }
        };

        let owner = request.owner.unwrap_or_else(|| default_owner.clone());
        if request.op.is_inline() {
            let result = handle_terminal(&service, &owner, request.op, &out).await;
            let _ = out.send(Reply::from_result(request.id, result).to_line()).await;
        } else {
            let service = Arc::clone(&service);
            let out = out.clone();
            in_flight.spawn(async move {
                let result = handle(&service, &owner, request.op).await;
                let _ = out.send(Reply::from_result(request.id, result).to_line()).await;
            });
        }

        // Reap finished requests as we go.
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                warn!("Request task failed: {}", e);
            }
        }
    }

    info!("Input closed, finishing {} requests", in_flight.len());
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!("Request task failed: {}", e);
        }
    }
    service.shutdown().await;
    Ok(())
}

async fn handle(service: &WorkspaceService, owner: &str, op: Op) -> Result<Value> {
    let value = match op {
        Op::Provision => serde_json::to_value(service.provision(owner).await?)?,
        Op::Tree { path, depth } => {
            serde_json::to_value(service.get_tree(owner, &path, depth).await?)?
        }
        Op::Read { path } => json!({ "content": service.read_file(owner, &path).await? }),
        Op::Write { path, content } => {
            service.write_file(owner, &path, &content).await?;
            json!({ "path": path, "bytes": content.len() })
        }
        Op::Create {
            path,
            kind,
            content,
        } => {
            service
                .create_entry(owner, &path, kind, content.as_deref())
                .await?;
            json!({ "path": path })
        }
        Op::Delete { path } => {
            service.delete_entry(owner, &path).await?;
            json!({ "path": path })
        }
        Op::Rename { from, to } => {
            service.rename_entry(owner, &from, &to).await?;
            json!({ "path": to })
        }
        Op::Move { from, to } => {
            service.move_entry(owner, &from, &to).await?;
            json!({ "path": to })
        }
        Op::Copy { from, to } => {
            service.copy_entry(owner, &from, &to).await?;
            json!({ "path": to })
        }
        Op::Run { path, cwd } => {
            serde_json::to_value(service.run_file(owner, &path, cwd.as_deref()).await?)?
        }
        Op::Exec { command, cwd } => {
            serde_json::to_value(service.run_command(owner, &command, cwd.as_deref()).await?)?
        }
        Op::Sessions => json!({ "sessions": service.sessions(owner).await? }),
        Op::Connect { .. } | Op::Input { .. } | Op::Resize { .. } | Op::Disconnect { .. } => {
            anyhow::bail!("terminal requests are handled inline")
        }
    };
    Ok(value)
}

async fn handle_terminal(
    service: &WorkspaceService,
    owner: &str,
    op: Op,
    out: &mpsc::Sender<String>,
) -> Result<Value> {
    match op {
        Op::Connect { cwd, size } => {
            let (events, rx) = mpsc::channel(EVENT_BUFFER);
            tokio::spawn(forward_events(rx, out.clone()));
            let session = service
                .connect(owner, &cwd, size.unwrap_or_default(), events)
                .await?;
            Ok(json!({ "session": session }))
        }
        Op::Input { session, data } => {
            service.input(&session, data.into_bytes()).await?;
            Ok(json!({ "session": session }))
        }
        Op::Resize {
            session,
            rows,
            cols,
        } => {
            service.resize(&session, TermSize { rows, cols }).await?;
            Ok(json!({ "session": session }))
        }
        Op::Disconnect { session } => {
            service.disconnect(&session).await?;
            Ok(json!({ "session": session }))
        }
        _ => anyhow::bail!("not a terminal request"),
    }
}

/// Encode one session's events onto the shared output.
async fn forward_events(mut events: mpsc::Receiver<TerminalEvent>, out: mpsc::Sender<String>) {
    let mut encoder = EventEncoder::new();
    while let Some(event) = events.recv().await {
        let Some(line) = encoder.encode(event) else {
            continue;
        };
        if out.send(line).await.is_err() {
            break;
        }
    }
}
