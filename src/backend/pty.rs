//! Pseudo-terminal plumbing for host shells.
//!
//! portable-pty is blocking, so the reader runs on a dedicated thread and
//! writes, resizes and kills go through `spawn_blocking`.

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use super::{BackendError, InteractiveProcess, ProcessControl, TermSize};

const READ_CHUNK: usize = 4096;

/// Prompt shown by shells that honour `PS1`.
pub(super) const PROMPT: &str = "\\u@\\h:\\w\\$ ";

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Control half of a host shell.
///
/// Writer, master and child sit behind separate locks that are only taken
/// on blocking threads, so a write stuck on a full pty never holds up a
/// resize or a kill.
struct PtyControl {
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    master: Arc<Mutex<Option<Box<dyn MasterPty + Send>>>>,
    child: Arc<Mutex<Option<Box<dyn Child + Send + Sync>>>>,
    closed: AtomicBool,
}

fn closed() -> BackendError {
    BackendError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "terminal is closed",
    ))
}

/// Run blocking pty work off the async threads.
async fn blocking<T, F>(work: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BackendError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl ProcessControl for PtyControl {
    async fn write(&self, bytes: &[u8]) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed());
        }
        let writer = Arc::clone(&self.writer);
        let bytes = bytes.to_vec();
        blocking(move || {
            let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
            let writer = guard.as_mut().ok_or_else(closed)?;
            writer.write_all(&bytes)?;
            writer.flush()?;
            Ok(())
        })
        .await
    }

    async fn resize(&self, size: TermSize) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed());
        }
        let master = Arc::clone(&self.master);
        blocking(move || {
            let guard = master.lock().unwrap_or_else(PoisonError::into_inner);
            let master = guard.as_ref().ok_or_else(closed)?;
            master
                .resize(pty_size(size))
                .map_err(|e| BackendError::Io(std::io::Error::other(e.to_string())))
        })
        .await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let child = Arc::clone(&self.child);
        let master = Arc::clone(&self.master);
        let writer = Arc::clone(&self.writer);
        let result = blocking(move || {
            let taken = child.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(mut child) = taken {
                if let Err(e) = child.kill() {
                    debug!("Shell already gone: {}", e);
                }
                let _ = child.wait();
            }
            drop(master.lock().unwrap_or_else(PoisonError::into_inner).take());
            // A write blocked on the dead pty releases the writer itself.
            if let Ok(mut writer) = writer.try_lock() {
                drop(writer.take());
            }
            Ok(())
        })
        .await;
        if let Err(e) = result {
            debug!("Failed to reap shell: {}", e);
        }
    }
}

/// Read the master side until EOF and forward chunks to `tx`.
fn read_loop(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
    debug!("PTY reader finished");
}

/// Start `shell` on a fresh pseudo-terminal in `cwd`.
pub(super) fn spawn_shell(
    shell: &str,
    cwd: &Path,
    home: &Path,
    size: TermSize,
) -> Result<InteractiveProcess, BackendError> {
    let spawn_err = |e: anyhow::Error| BackendError::spawn_failed(shell, e.to_string());

    let pair = native_pty_system()
        .openpty(pty_size(size))
        .map_err(spawn_err)?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.cwd(cwd);
    cmd.env("TERM", "xterm-256color");
    cmd.env("HOME", home);
    cmd.env("PS1", PROMPT);

    let child = pair.slave.spawn_command(cmd).map_err(spawn_err)?;
    // Only the child may hold the slave, otherwise EOF never arrives.
    drop(pair.slave);

    let reader = pair.master.try_clone_reader().map_err(spawn_err)?;
    let writer = pair.master.take_writer().map_err(spawn_err)?;

    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("nook-pty-reader".to_string())
        .spawn(move || read_loop(reader, tx))?;

    debug!("Spawned {} on a {}x{} pty", shell, size.cols, size.rows);

    Ok(InteractiveProcess {
        output: rx,
        control: Box::new(PtyControl {
            writer: Arc::new(Mutex::new(Some(writer))),
            master: Arc::new(Mutex::new(Some(pair.master))),
            child: Arc::new(Mutex::new(Some(child))),
            closed: AtomicBool::new(false),
        }),
    })
}
