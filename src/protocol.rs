//! JSON-lines wire format of `nook serve`.
//!
//! One request object per input line, one reply or event object per
//! output line. Replies echo the request `id`; terminal events carry the
//! session id instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{BackendError, EntryKind, TermSize};
use crate::error::WorkspaceError;
use crate::path::WORKSPACE_ROOT;
use crate::terminal::TerminalEvent;

fn default_root() -> String {
    WORKSPACE_ROOT.to_string()
}

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    /// Workspace owner; falls back to the server's default owner.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(flatten)]
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Provision,
    Tree {
        #[serde(default = "default_root")]
        path: String,
        #[serde(default)]
        depth: Option<usize>,
    },
    Read {
        path: String,
    },
    Write {
        path: String,
        content: String,
    },
    Create {
        path: String,
        kind: EntryKind,
        #[serde(default)]
        content: Option<String>,
    },
    Delete {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
    Move {
        from: String,
        to: String,
    },
    Copy {
        from: String,
        to: String,
    },
    Run {
        path: String,
        #[serde(default)]
        cwd: Option<String>,
    },
    Exec {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
    },
    Connect {
        #[serde(default = "default_root")]
        cwd: String,
        #[serde(default)]
        size: Option<TermSize>,
    },
    Input {
        session: String,
        data: String,
    },
    Resize {
        session: String,
        rows: u16,
        cols: u16,
    },
    Disconnect {
        session: String,
    },
    /// Live terminal sessions on the owner's workspace.
    Sessions,
}

impl Op {
    /// Terminal traffic is handled in arrival order on the read loop.
    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Input { .. } | Self::Resize { .. } | Self::Disconnect { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    /// Wire form of an error, keeping the most specific kind available.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let kind = if let Some(e) = error.downcast_ref::<WorkspaceError>() {
            e.kind()
        } else if let Some(e) = error.downcast_ref::<BackendError>() {
            if e.is_not_found() {
                "not_found"
            } else {
                "backend"
            }
        } else {
            "internal"
        };
        Self {
            kind: kind.to_string(),
            message: format!("{error:#}"),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_request".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_result(id: Value, result: anyhow::Result<Value>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(e) => Self::err(id, ErrorBody::from_error(&e)),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            json!({"id": self.id, "ok": false, "error": {"kind": "internal", "message": e.to_string()}})
                .to_string()
        })
    }
}

/// Turns byte chunks into text without splitting multi-byte characters.
///
/// An incomplete sequence at the end of a chunk is held back until the
/// next chunk. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return text;
                        }
                    }
                }
            }
        }
    }

    /// Whatever is still held back, replaced lossily.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Renders one session's events as wire lines.
#[derive(Debug, Default)]
pub struct EventEncoder {
    session: Option<String>,
    carry: Utf8Carry,
}

impl EventEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire line for `event`, or `None` when an output chunk only held an
    /// incomplete character.
    pub fn encode(&mut self, event: TerminalEvent) -> Option<String> {
        let value = match event {
            TerminalEvent::Connected {
                session_id,
                working_dir,
                degraded,
            } => {
                self.session = Some(session_id);
                json!({
                    "session": self.session,
                    "event": "connected",
                    "working_dir": working_dir,
                    "degraded": degraded,
                })
            }
            TerminalEvent::Output(bytes) => {
                let data = self.carry.push(&bytes);
                if data.is_empty() {
                    return None;
                }
                json!({"session": self.session, "event": "output", "data": data})
            }
            TerminalEvent::Error(message) => {
                json!({"session": self.session, "event": "error", "message": message})
            }
            TerminalEvent::Disconnected => {
                let rest = self.carry.finish();
                if rest.is_empty() {
                    json!({"session": self.session, "event": "disconnected"})
                } else {
                    json!({"session": self.session, "event": "disconnected", "data": rest})
                }
            }
        };
        Some(value.to_string())
    }
}
