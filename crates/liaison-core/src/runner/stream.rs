//! Parsing of the assistant CLI's stream-json output
//!
//! The process writes one JSON event per line. Only a handful of event
//! types matter here; unknown types and non-JSON noise are tolerated.

use serde::Deserialize;
use serde_json::Value;

use super::events::PermissionKind;

/// One line of the process's stdout
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum CliEvent {
    #[serde(rename = "system")]
    System(SystemEvent),
    #[serde(rename = "assistant")]
    Assistant(AssistantEvent),
    #[serde(rename = "result")]
    Result(ResultEvent),
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct SystemEvent {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantEvent {
    #[serde(default)]
    pub message: AssistantMessage,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl AssistantEvent {
    /// Concatenated text blocks of this message
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.message.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}

/// The end-of-turn marker: final text, conversation id, and any permission
/// denials recorded during the run
#[derive(Debug, Default, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub permission_denials: Vec<PermissionDenial>,
}

/// A tool invocation the process was not allowed to perform
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionDenial {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_use_id: String,
}

impl PermissionDenial {
    pub fn kind(&self) -> PermissionKind {
        PermissionKind::from_tool_name(&self.tool_name)
    }

    /// Human-readable target of the denied action
    pub fn target(&self) -> String {
        match self.tool_name.as_str() {
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" | "Read" => self
                .tool_input
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            "Bash" => {
                let cmd = self
                    .tool_input
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                truncate(cmd, 60)
            }
            _ => truncate(&self.tool_input.to_string(), 50),
        }
    }

    /// One line describing the denial, for the operator-facing prompt
    pub fn describe(&self) -> String {
        format!("{}: {}", self.tool_name, self.target())
    }

    /// Allowed-tools pattern granting exactly this action on re-invocation.
    ///
    /// File tools are granted by name (the CLI cannot filter them by path);
    /// shell commands are narrowed to their leading word.
    pub fn grant_pattern(&self) -> String {
        match self.tool_name.as_str() {
            "Bash" => {
                let cmd = self
                    .tool_input
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                match cmd.split_whitespace().next() {
                    Some(word) => format!("Bash({}:*)", word),
                    None => "Bash".to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub error: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorEvent {
    pub fn message(&self) -> String {
        if let Some(msg) = self.error.get("message").and_then(Value::as_str) {
            return msg.to_string();
        }
        if let Value::String(s) = &self.error {
            return s.clone();
        }
        self.message
            .clone()
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Parse one stdout line; `None` for non-JSON noise
pub fn parse_line(line: &str) -> Option<CliEvent> {
    serde_json::from_str(line.trim()).ok()
}

const QUOTA_KEYWORDS: &[&str] = &[
    "quota",
    "billing",
    "rate_limit",
    "rate limit",
    "overloaded",
    "credit balance",
    "quota exceeded",
    "spending limit",
    "hit your limit",
    "usage limit",
];

/// Whether an error message points at quota/billing exhaustion rather than a
/// genuine process fault. The CLI sometimes reports these as plain assistant
/// text instead of error events.
pub fn looks_like_quota_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_result_event() {
        let line = r#"{"type":"result","result":"done","session_id":"abc-123","permission_denials":[]}"#;
        match parse_line(line) {
            Some(CliEvent::Result(res)) => {
                assert_eq!(res.result.as_deref(), Some("done"));
                assert_eq!(res.session_id.as_deref(), Some("abc-123"));
                assert!(res.permission_denials.is_empty());
            }
            other => panic!("expected result event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_result_with_denials() {
        let line = r#"{"type":"result","result":"","session_id":"s1","permission_denials":[{"tool_name":"Write","tool_input":{"file_path":"/tmp/x"},"tool_use_id":"t1"}]}"#;
        match parse_line(line) {
            Some(CliEvent::Result(res)) => {
                assert_eq!(res.permission_denials.len(), 1);
                let denial = &res.permission_denials[0];
                assert_eq!(denial.kind(), PermissionKind::Write);
                assert_eq!(denial.target(), "/tmp/x");
            }
            other => panic!("expected result event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_assistant_text() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"},{"type":"tool_use","id":"t","name":"Bash","input":{}}]}}"#;
        match parse_line(line) {
            Some(CliEvent::Assistant(ev)) => assert_eq!(ev.text(), "hello"),
            other => panic!("expected assistant event, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_noise() {
        assert!(matches!(
            parse_line(r#"{"type":"rate_limit","info":"x"}"#),
            Some(CliEvent::Other)
        ));
        assert!(parse_line("not json at all").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_grant_patterns() {
        let write = PermissionDenial {
            tool_name: "Write".into(),
            tool_input: json!({"file_path": "/tmp/x"}),
            tool_use_id: "t1".into(),
        };
        assert_eq!(write.grant_pattern(), "Write");

        let bash = PermissionDenial {
            tool_name: "Bash".into(),
            tool_input: json!({"command": "cargo build --release"}),
            tool_use_id: "t2".into(),
        };
        assert_eq!(bash.grant_pattern(), "Bash(cargo:*)");

        let empty_bash = PermissionDenial {
            tool_name: "Bash".into(),
            tool_input: json!({}),
            tool_use_id: "t3".into(),
        };
        assert_eq!(empty_bash.grant_pattern(), "Bash");
    }

    #[test]
    fn test_error_event_shapes() {
        let object = parse_line(r#"{"type":"error","error":{"message":"boom"}}"#);
        match object {
            Some(CliEvent::Error(ev)) => assert_eq!(ev.message(), "boom"),
            other => panic!("expected error event, got {:?}", other),
        }

        let string = parse_line(r#"{"type":"error","error":"plain failure"}"#);
        match string {
            Some(CliEvent::Error(ev)) => assert_eq!(ev.message(), "plain failure"),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_quota_detection() {
        assert!(looks_like_quota_error("You have hit your usage limit"));
        assert!(looks_like_quota_error("Credit balance too low"));
        assert!(!looks_like_quota_error("segmentation fault"));
    }
}
