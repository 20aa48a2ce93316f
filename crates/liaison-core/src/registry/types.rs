//! Session types and the auto-continue routing rule
//!
//! A session binds a working directory to an assistant conversation. The
//! registry hands out immutable [`Session`] snapshots; live state stays
//! behind the registry's per-entry locks.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a session: the normalized working-directory path
pub type SessionKey = String;

/// How long after its last activity a session keeps receiving unaddressed
/// messages (seconds)
pub const AUTO_CONTINUE_WINDOW_SECS: i64 = 600;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No turn in flight
    Idle,
    /// A turn is executing against the assistant process
    Running,
    /// A turn is parked on an unresolved permission request
    AwaitingPermission,
}

impl SessionStatus {
    /// A busy session rejects new turns
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingPermission)
    }
}

/// Immutable snapshot of one session's state
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Normalized working-directory path
    pub key: SessionKey,
    /// Short human-readable name (last path component)
    pub display_label: String,
    pub status: SessionStatus,
    /// Timestamp of the last inbound or outbound event
    pub last_activity: DateTime<Utc>,
    /// Handle into the assistant's own transcript store, once the first
    /// turn has completed
    pub conversation_id: Option<String>,
    /// Derived topic title, once the first answer has been produced
    pub title: Option<String>,
}

impl Session {
    /// Whether this session is still within the auto-continue window
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity < Duration::seconds(AUTO_CONTINUE_WINDOW_SECS)
    }
}

/// Normalize a raw directory reference into a session key.
///
/// Relative paths and `~` live under the home directory (so `projects/api`
/// means `~/projects/api`); the result is canonicalized when the directory
/// exists.
pub fn normalize_key(raw: &str) -> SessionKey {
    let expanded = expand_path(raw);
    let resolved = dunce::canonicalize(&expanded).unwrap_or(expanded);
    resolved.to_string_lossy().into_owned()
}

fn expand_path(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(rest),
        };
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return path;
    }
    match dirs::home_dir() {
        Some(home) => home.join(path),
        None => path,
    }
}

/// Short display name for a session key
pub fn display_label(key: &str) -> String {
    Path::new(key)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_string())
}

/// Apply the auto-continue rule to a set of `(key, last_activity)` pairs.
///
/// Returns the key with the greatest `last_activity` strictly within the
/// window, breaking exact-timestamp ties lexicographically on key. `None`
/// means no session qualifies and resolution is ambiguous.
pub fn pick_auto_continue(
    candidates: &[(SessionKey, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> Option<SessionKey> {
    let window = Duration::seconds(AUTO_CONTINUE_WINDOW_SECS);
    candidates
        .iter()
        .filter(|(_, at)| now - *at < window)
        .max_by(|(ka, ta), (kb, tb)| ta.cmp(tb).then_with(|| kb.cmp(ka)))
        .map(|(key, _)| key.clone())
}
