//! Turn event types
//!
//! One `execute` invocation produces a stream of [`TurnEvent`]s that is
//! non-empty and ends in exactly one terminal event.

use serde::{Deserialize, Serialize};

/// Opaque identifier for one in-flight turn
pub type TurnId = String;

/// The fixed set of action kinds a permission request can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Write,
    Edit,
    Read,
    Execute,
}

impl PermissionKind {
    /// Classify an assistant tool name into an action kind
    pub fn from_tool_name(name: &str) -> Self {
        match name {
            "Write" => Self::Write,
            "Edit" | "MultiEdit" | "NotebookEdit" => Self::Edit,
            "Read" => Self::Read,
            _ => Self::Execute,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Read => "read",
            Self::Execute => "execute",
        }
    }
}

impl std::fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A permission request surfaced by the running process.
///
/// The stream pauses after this event; no further events arrive until the
/// caller resolves it through `ProcessRunner::resolve_permission`.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub turn_id: TurnId,
    /// Kind of the first denied action
    pub kind: PermissionKind,
    /// Human-readable target of the first denied action
    pub target: String,
    /// Full denial list as reported by the process, one line per action
    pub raw: String,
}

/// Final textual result of a turn
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Title embedded in the response, stripped out of `text`
    pub title_hint: Option<String>,
    /// The assistant's conversation handle, reported on every completed turn
    pub conversation_id: Option<String>,
}

/// Why a turn failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The hard wall-clock ceiling was exceeded
    Timeout,
    /// The process could not be spawned
    Spawn,
    /// The process exited non-zero or reported an error
    Exit,
    /// The process exited cleanly but its output carried no result
    MalformedOutput,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Spawn => "spawn",
            Self::Exit => "exit",
            Self::MalformedOutput => "malformed output",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event in a turn's stream
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Periodic liveness signal while the process has produced no output
    StatusTick { label: String },
    /// The process needs authorization; the stream pauses until resolution
    PermissionRequested(PermissionRequest),
    /// Terminal: the final answer
    Answer(Answer),
    /// Terminal: the turn failed
    Failed { kind: FailureKind, detail: String },
    /// Terminal: the turn was cancelled (explicitly, or by a denied or
    /// expired permission request)
    Cancelled,
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Answer(_) | Self::Failed { .. } | Self::Cancelled
        )
    }
}
