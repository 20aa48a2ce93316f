//! Read-only access to the assistant's own transcript store
//!
//! The assistant CLI persists every conversation as a `.jsonl` file under
//! `<store>/projects/<mangled-working-dir>/<conversation-id>.jsonl`. The
//! registry never writes here; this module only locates conversations for
//! the resume picker and reads short recaps.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Marker the assistant inserts when a conversation was compacted; messages
/// before it belong to a summarized-away segment
const CONTINUATION_MARKER: &str = "continued from a previous conversation";

/// One stored conversation, as listed by the resume picker
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub first_message: String,
}

/// Role of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One user/assistant exchange line read back from a transcript
#[derive(Debug, Clone)]
pub struct TranscriptMessage {
    pub role: Role,
    pub text: String,
}

/// Handle on the assistant's transcript store
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    root: PathBuf,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|h| h.join(".claude"))
            .unwrap_or_else(|| PathBuf::from(".claude"));
        Self { root }
    }
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// The store's directory name for a working directory: every
    /// non-alphanumeric character becomes a dash
    pub fn mangle(working_dir: &Path) -> String {
        working_dir
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect()
    }

    /// Locate the project directory for a working directory.
    ///
    /// Falls back to a suffix match on the final path component when the
    /// exact mangled name is absent (the store may have been written from a
    /// differently-resolved path).
    pub fn project_dir(&self, working_dir: &Path) -> Option<PathBuf> {
        let projects = self.projects_dir();
        if !projects.is_dir() {
            return None;
        }

        let exact = projects.join(Self::mangle(working_dir));
        if exact.is_dir() {
            return Some(exact);
        }

        let suffix = working_dir
            .file_name()
            .map(|n| Self::mangle(Path::new(n)))
            .filter(|s| !s.is_empty())?;
        let entries = fs::read_dir(&projects).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().ends_with(&format!("-{}", suffix)))
            {
                return Some(path);
            }
        }
        None
    }

    /// Conversation files for a working directory, newest first. Agent
    /// scratch files and empty files are skipped.
    fn conversation_files(&self, working_dir: &Path) -> Vec<PathBuf> {
        let Some(project_dir) = self.project_dir(working_dir) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(&project_dir) else {
            return Vec::new();
        };
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_string_lossy().into_owned();
                if !name.ends_with(".jsonl") || name.starts_with("agent-") {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                if meta.len() == 0 {
                    return None;
                }
                Some((path, meta.modified().ok()?))
            })
            .collect();
        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.into_iter().map(|(path, _)| path).collect()
    }

    /// Most recently modified conversation id for a working directory
    pub fn latest_conversation(&self, working_dir: &Path) -> Option<String> {
        self.conversation_files(working_dir)
            .first()
            .and_then(|p| conversation_id(p))
    }

    /// Recent conversations with their first user message, newest first
    pub fn list_recent(&self, working_dir: &Path, limit: usize) -> Vec<ConversationSummary> {
        let mut out = Vec::new();
        for path in self.conversation_files(working_dir).into_iter().take(limit * 2) {
            if out.len() >= limit {
                break;
            }
            let Some(id) = conversation_id(&path) else {
                continue;
            };
            let Some(first_message) = first_user_message(&path) else {
                continue;
            };
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(ConversationSummary {
                id,
                modified,
                first_message,
            });
        }
        out
    }

    /// Last `last_n` user/assistant messages of a conversation, or `None`
    /// when the conversation does not exist for that directory
    pub fn read_messages(
        &self,
        conversation_id: &str,
        working_dir: &Path,
        last_n: usize,
    ) -> Option<Vec<TranscriptMessage>> {
        let project_dir = self.project_dir(working_dir)?;
        let path = project_dir.join(format!("{}.jsonl", conversation_id));
        if !path.is_file() {
            return None;
        }
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read transcript {}: {}", path.display(), e);
                return None;
            }
        };

        let mut messages: Vec<TranscriptMessage> = Vec::new();
        for line in contents.lines() {
            let Ok(value) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            match value.get("type").and_then(Value::as_str) {
                Some("user") => {
                    let text = message_text(&value);
                    // Compaction boundary: keep only the current segment
                    let head: String = text.to_lowercase().chars().take(200).collect();
                    if head.contains(CONTINUATION_MARKER) {
                        messages.clear();
                        continue;
                    }
                    if text.chars().count() > 10 && !text.starts_with("[Request") {
                        messages.push(TranscriptMessage {
                            role: Role::User,
                            text,
                        });
                    }
                }
                Some("assistant") => {
                    let text = message_text(&value);
                    if !text.is_empty() {
                        messages.push(TranscriptMessage {
                            role: Role::Assistant,
                            text,
                        });
                    }
                }
                _ => {}
            }
        }

        let skip = messages.len().saturating_sub(last_n);
        Some(messages.split_off(skip))
    }

    /// Find the working directory a conversation belongs to by scanning all
    /// project directories and un-mangling the match
    pub fn find_working_dir(&self, conversation_id: &str) -> Option<PathBuf> {
        let projects = self.projects_dir();
        let entries = fs::read_dir(&projects).ok()?;
        for entry in entries.flatten() {
            let project_dir = entry.path();
            if !project_dir.is_dir() {
                continue;
            }
            if !project_dir
                .join(format!("{}.jsonl", conversation_id))
                .is_file()
            {
                continue;
            }
            let name = project_dir.file_name()?.to_string_lossy().into_owned();
            return Some(unmangle(&name));
        }
        None
    }
}

fn conversation_id(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Reverse the dash-mangling as far as the filesystem allows.
///
/// Dashes are ambiguous (they replace `/`, `.`, `_` and literal dashes), so
/// try the naive `/`-only reading first, then walk existing parents and
/// match their children by re-mangling.
fn unmangle(mangled: &str) -> PathBuf {
    let trimmed = mangled.trim_start_matches('-');
    let naive = PathBuf::from(format!("/{}", trimmed.replace('-', "/")));
    if naive.is_dir() {
        return naive;
    }

    let parts: Vec<&str> = trimmed.split('-').collect();
    for i in (1..parts.len()).rev() {
        let parent = PathBuf::from(format!("/{}", parts[..i].join("/")));
        if !parent.is_dir() {
            continue;
        }
        if let Ok(children) = fs::read_dir(&parent) {
            for child in children.flatten() {
                let path = child.path();
                if path.is_dir() && TranscriptStore::mangle(&path).trim_start_matches('-') == trimmed
                {
                    return path;
                }
            }
        }
        break;
    }
    debug!("Could not reverse transcript dir name {}, using naive path", mangled);
    naive
}

/// First non-empty user message of a transcript file
fn first_user_message(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if value.get("type").and_then(Value::as_str) == Some("user") {
            let text = message_text(&value);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn message_text(value: &Value) -> String {
    let content = value.pointer("/message/content");
    match content {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(blocks)) => {
            let parts: Vec<String> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .map(|t| t.trim().to_string())
                .collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}
