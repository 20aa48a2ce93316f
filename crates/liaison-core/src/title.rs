//! Topic-title derivation
//!
//! A finished answer names its chat topic: either through a title the
//! assistant embedded in the response (`<!-- title: ... -->`), or through
//! the external summarizer, or by truncating the original message. Names
//! carry a `[label] DD/MM - ` prefix and fit within the transport's cap.

use async_trait::async_trait;
use chrono::Local;

use crate::error::Result;

/// Longest topic name the chat transport accepts
pub const MAX_TITLE_LEN: usize = 128;

/// External short-title summarizer.
///
/// Called only for answers that carry no embedded title hint.
#[async_trait]
pub trait TitleSummarizer: Send + Sync {
    /// Produce a short title (a handful of words) from a conversation
    /// excerpt
    async fn summarize(&self, excerpt: &str) -> Result<String>;
}

/// Extract an embedded `<!-- title: ... -->` comment from a response.
///
/// Returns the response with the comment stripped, plus the title if one
/// was present.
pub fn extract_title_hint(response: &str) -> (String, Option<String>) {
    let mut search_from = 0;
    while let Some(start_rel) = response[search_from..].find("<!--") {
        let start = search_from + start_rel;
        let Some(end_rel) = response[start..].find("-->") else {
            break;
        };
        let end = start + end_rel + 3;
        let inner = response[start + 4..end - 3].trim();
        if let Some(title) = inner.strip_prefix("title:") {
            let title = title.trim();
            if !title.is_empty() {
                let mut cleaned = String::with_capacity(response.len());
                cleaned.push_str(&response[..start]);
                cleaned.push_str(&response[end..]);
                return (cleaned.trim().to_string(), Some(title.to_string()));
            }
        }
        search_from = end;
    }
    (response.to_string(), None)
}

/// Excerpt handed to the summarizer
pub fn title_excerpt(message: &str, response: &str) -> String {
    format!(
        "User: {}\nAssistant: {}",
        truncate_chars(message, 200),
        truncate_chars(response, 300)
    )
}

/// Provisional topic name from the first message, before any answer exists
pub fn provisional_title(message: &str, label: Option<&str>) -> String {
    let text = strip_command(message);
    let text = if text.is_empty() {
        "New conversation"
    } else {
        &text
    };
    with_prefix(text, label)
}

/// Final topic name from a derived title
pub fn format_title(title: &str, label: Option<&str>) -> String {
    with_prefix(title, label)
}

/// Last-resort title when no hint exists and the summarizer is unavailable
/// or fails: the message itself, truncated
pub fn fallback_title(message: &str) -> String {
    let text = strip_command(message);
    if text.is_empty() {
        return "Conversation".to_string();
    }
    if text.chars().count() > 50 {
        let cut: String = text.chars().take(50).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn with_prefix(text: &str, label: Option<&str>) -> String {
    let date = Local::now().format("%d/%m");
    let prefix = match label {
        Some(label) => format!("[{}] {} - ", label, date),
        None => format!("{} - ", date),
    };
    let budget = MAX_TITLE_LEN.saturating_sub(prefix.chars().count());
    let text = if text.chars().count() > budget {
        let cut: String = text.chars().take(budget.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    };
    format!("{}{}", prefix, text)
}

/// Strip a leading `/command` from message text
fn strip_command(message: &str) -> String {
    let trimmed = message.trim();
    if let Some(rest) = trimmed.strip_prefix('/') {
        match rest.split_once(char::is_whitespace) {
            Some((_, tail)) => tail.trim().to_string(),
            None => String::new(),
        }
    } else {
        trimmed.to_string()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
