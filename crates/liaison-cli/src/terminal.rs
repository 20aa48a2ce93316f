//! Terminal-backed Notifier implementation
//!
//! Renders dispatcher output on stdout: text messages as lines, choices as
//! numbered menus (answered by typing the number), and status edits by
//! rewriting the last line when possible.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use console::{Term, style};
use parking_lot::Mutex;

use liaison_core::error::Result;
use liaison_core::notifier::{ChatTarget, Choice, MessageRef, Notifier};

pub struct TerminalNotifier {
    term: Term,
    next_id: AtomicU64,
    /// Action ids of the most recent choice menu, selectable by number
    last_choice: Mutex<Vec<(String, String)>>,
    /// Id of the last message we printed, for in-place edits
    last_printed: Mutex<Option<String>>,
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
            next_id: AtomicU64::new(1),
            last_choice: Mutex::new(Vec::new()),
            last_printed: Mutex::new(None),
        }
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Action id for the n-th option (1-based) of the last choice menu
    pub fn action_for_choice(&self, n: usize) -> Option<String> {
        self.last_choice
            .lock()
            .get(n.checked_sub(1)?)
            .map(|(_, action)| action.clone())
    }
}

impl Default for TerminalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for TerminalNotifier {
    async fn send_text(&self, chat: &ChatTarget, text: &str) -> Result<MessageRef> {
        let id = self.next_id();
        self.term.write_line(&format!("● {}", text))?;
        *self.last_printed.lock() = Some(id.clone());
        Ok(MessageRef {
            chat: chat.clone(),
            id,
        })
    }

    async fn send_choice(
        &self,
        chat: &ChatTarget,
        text: &str,
        options: &[Choice],
    ) -> Result<MessageRef> {
        let id = self.next_id();
        self.term.write_line(&format!("● {}", text))?;
        for (i, option) in options.iter().enumerate() {
            self.term
                .write_line(&format!("  {} {}", style(format!("[{}]", i + 1)).bold(), option.label))?;
        }
        *self.last_choice.lock() = options
            .iter()
            .map(|c| (c.label.clone(), c.action_id.clone()))
            .collect();
        *self.last_printed.lock() = None;
        Ok(MessageRef {
            chat: chat.clone(),
            id,
        })
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<()> {
        let mut last = self.last_printed.lock();
        if last.as_deref() == Some(message.id.as_str()) {
            // Rewrite the line in place (the animated status indicator)
            self.term.clear_last_lines(1)?;
            self.term.write_line(&format!("● {}", text))?;
        } else {
            self.term
                .write_line(&format!("✎ {}", style(text).dim()))?;
            *last = Some(message.id.clone());
        }
        Ok(())
    }
}
