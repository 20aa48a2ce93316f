//! Operator command parsing
//!
//! Explicit commands bypass auto-continue resolution and act directly on
//! the registry and runner. Frontends feed raw text through
//! [`Command::parse`] and hand the result to the dispatcher.

/// An explicit operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Continue the most recent conversation with a message, ignoring the
    /// auto-continue window
    Continue(String),
    /// Start a fresh conversation, optionally with a first message
    New(Option<String>),
    /// Switch the default directory; `None` shows the directory menu
    Switch(Option<String>),
    /// List sessions as a switch menu
    List,
    /// Remove a session record
    Remove(String),
    /// Resume a stored conversation by id, or show the picker
    Resume(Option<String>),
    /// Cancel the active turn
    Cancel,
    /// Report session status
    Status,
    /// Recognized command used incorrectly; carries the usage line
    Usage(&'static str),
    /// Unrecognized command; carries the attempted name
    Unknown(String),
}

impl Command {
    /// Parse a slash command. `None` means the text is a plain message.
    pub fn parse(text: &str) -> Option<Command> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let (cmd, args) = match trimmed.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (trimmed, ""),
        };

        let command = match cmd.to_lowercase().as_str() {
            "/start" | "/help" => Command::Help,
            "/c" | "/continue" => {
                if args.is_empty() {
                    Command::Usage("Usage: /c <message>")
                } else {
                    Command::Continue(args.to_string())
                }
            }
            "/new" => Command::New((!args.is_empty()).then(|| args.to_string())),
            "/dir" | "/switch" => Command::Switch((!args.is_empty()).then(|| args.to_string())),
            "/dirs" | "/list" => Command::List,
            "/rmdir" | "/remove" => {
                if args.is_empty() {
                    Command::Usage("Usage: /rmdir <path>")
                } else {
                    Command::Remove(args.to_string())
                }
            }
            "/resume" => Command::Resume((!args.is_empty()).then(|| args.to_string())),
            "/cancel" => Command::Cancel,
            "/status" => Command::Status,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

/// Help text listing the command set
pub const HELP_TEXT: &str = "\
Liaison — assistant bridge

Commands
/c <msg> — continue the last conversation
/new [msg] — start a fresh conversation
/resume [id] — resume a stored conversation
/dir <path> — switch directory (relative to ~)
/dirs — list sessions
/rmdir <path> — remove a session
/cancel — stop the current turn
/status — session status

Plain messages auto-continue the most recent
session for 10 minutes after its last activity.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse("  leading spaces"), None);
    }

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse("/cancel"), Some(Command::Cancel));
        assert_eq!(Command::parse("/status"), Some(Command::Status));
        assert_eq!(Command::parse("/dirs"), Some(Command::List));
    }

    #[test]
    fn test_parse_with_arguments() {
        assert_eq!(
            Command::parse("/c run the tests"),
            Some(Command::Continue("run the tests".to_string()))
        );
        assert_eq!(
            Command::parse("/dir projects/api"),
            Some(Command::Switch(Some("projects/api".to_string())))
        );
        assert_eq!(Command::parse("/dir"), Some(Command::Switch(None)));
        assert_eq!(Command::parse("/new"), Some(Command::New(None)));
        assert_eq!(
            Command::parse("/resume abc-123"),
            Some(Command::Resume(Some("abc-123".to_string())))
        );
    }

    #[test]
    fn test_parse_usage_errors() {
        assert!(matches!(Command::parse("/c"), Some(Command::Usage(_))));
        assert!(matches!(Command::parse("/rmdir"), Some(Command::Usage(_))));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            Command::parse("/frobnicate now"),
            Some(Command::Unknown("/frobnicate".to_string()))
        );
    }

    #[test]
    fn test_case_insensitive_command_word() {
        assert_eq!(Command::parse("/HELP"), Some(Command::Help));
    }
}
