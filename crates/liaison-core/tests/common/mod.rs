//! Shared test doubles: a recording notifier and fake assistant scripts

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use liaison_core::error::Result;
use liaison_core::notifier::{ChatTarget, Choice, MessageRef, Notifier};

/// One interaction recorded by the mock notifier
#[derive(Debug, Clone)]
pub enum Sent {
    Text {
        chat: String,
        text: String,
        id: String,
    },
    Choice {
        chat: String,
        text: String,
        options: Vec<(String, String)>,
        id: String,
    },
    Edit {
        id: String,
        text: String,
    },
}

/// Notifier that records everything it is asked to send
#[derive(Default)]
pub struct MockNotifier {
    next_id: AtomicU64,
    pub events: Mutex<Vec<Sent>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// All plain text messages sent so far
    pub fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Sent::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether any sent text contains the needle
    pub fn saw_text(&self, needle: &str) -> bool {
        self.texts().iter().any(|t| t.contains(needle))
    }

    /// Options of the most recent choice message
    pub fn last_choice_options(&self) -> Option<Vec<(String, String)>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|e| match e {
                Sent::Choice { options, .. } => Some(options.clone()),
                _ => None,
            })
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_text(&self, chat: &ChatTarget, text: &str) -> Result<MessageRef> {
        let id = self.next_id();
        self.events.lock().unwrap().push(Sent::Text {
            chat: chat.clone(),
            text: text.to_string(),
            id: id.clone(),
        });
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
        self.events.lock().unwrap().push(Sent::Choice {
            chat: chat.clone(),
            text: text.to_string(),
            options: options
                .iter()
                .map(|c| (c.label.clone(), c.action_id.clone()))
                .collect(),
            id: id.clone(),
        });
        Ok(MessageRef {
            chat: chat.clone(),
            id,
        })
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<()> {
        self.events.lock().unwrap().push(Sent::Edit {
            id: message.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Write an executable shell script standing in for the assistant CLI.
/// Returns the tempdir (keep it alive) and the script path.
#[cfg(unix)]
pub fn fake_cli(body: &str) -> (tempfile::TempDir, String) {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assistant");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    (dir, path.to_string_lossy().into_owned())
}

/// Poll until `check` passes or the deadline expires
pub async fn wait_for<F>(deadline: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if check() {
            return;
        }
        if start.elapsed() > deadline {
            panic!("condition not met within {:?}", deadline);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
