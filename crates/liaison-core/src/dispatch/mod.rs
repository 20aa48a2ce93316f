//! Dispatcher - routes inbound messages to sessions and relays turn events
//!
//! One state machine per inbound message: resolve the target session,
//! atomically claim it (busy sessions reject immediately, no queueing),
//! invoke the process runner, and relay its event stream to the notifier.
//! Status ticks edit a single retained status message; permission requests
//! become approve/deny choices; terminal events release the session.
//! Independent sessions run their turns concurrently; within one session
//! the registry's check-and-set serializes turns.

mod command;

pub use command::{Command, HELP_TEXT};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::notifier::{ChatTarget, Choice, MessageRef, Notifier};
use crate::registry::{Session, SessionRegistry, SessionStatus, normalize_key};
use crate::runner::{
    Answer, PermissionRequest, ProcessRunner, RunnerConfig, TurnEvent, TurnRequest,
};
use crate::title::{self, TitleSummarizer};
use crate::transcripts::{Role, TranscriptStore};

struct PendingPermission {
    turn_id: String,
    session_key: String,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingPermission>>>;

/// Coordinates the registry, the process runner, and the notifier
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    runner: Arc<ProcessRunner>,
    notifier: Arc<dyn Notifier>,
    summarizer: Option<Arc<dyn TitleSummarizer>>,
    transcripts: TranscriptStore,
    favorite_dirs: Vec<String>,
    /// Normalized key new sessions default to when nothing else resolves
    default_dir: Mutex<Option<String>>,
    /// Unresolved permission requests keyed by opaque action id
    pending_permissions: PendingMap,
}

impl Dispatcher {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        let default_dir = config
            .resolved_default_dir()
            .map(|p| normalize_key(&p.to_string_lossy()));
        Self {
            registry: Arc::new(SessionRegistry::new()),
            runner: Arc::new(ProcessRunner::new(RunnerConfig::from(config))),
            notifier,
            summarizer: None,
            transcripts: TranscriptStore::default(),
            favorite_dirs: config.favorite_dirs.clone(),
            default_dir: Mutex::new(default_dir),
            pending_permissions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Use an external title summarizer for answers without a title hint
    pub fn with_summarizer(mut self, summarizer: Arc<dyn TitleSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Point at a non-default transcript store (mainly for tests)
    pub fn with_transcripts(mut self, transcripts: TranscriptStore) -> Self {
        self.transcripts = transcripts;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn runner(&self) -> &Arc<ProcessRunner> {
        &self.runner
    }

    /// Entry point for inbound operator text: commands act directly, plain
    /// messages go through session resolution and become turns.
    pub async fn handle_message(&self, chat: &ChatTarget, text: &str) -> Result<()> {
        match Command::parse(text) {
            Some(command) => self.handle_command(chat, command).await,
            None => self.dispatch_text(chat, text, None, false).await,
        }
    }

    /// Entry point for interactive button taps
    pub async fn handle_action(&self, chat: &ChatTarget, action_id: &str) -> Result<()> {
        debug!("Action: {}", action_id);
        if let Some(rest) = action_id.strip_prefix("perm:") {
            return self.handle_permission_action(chat, rest).await;
        }
        if let Some(id) = action_id.strip_prefix("resume:") {
            return self.attach_conversation(chat, id).await;
        }
        if let Some(key) = action_id.strip_prefix("switch:") {
            return self.switch_to(chat, key).await;
        }
        self.notifier.send_text(chat, "Unknown action.").await?;
        Ok(())
    }

    /// Run one turn for a message: resolve, claim, execute, relay.
    ///
    /// `explicit` bypasses auto-continue; `fresh` discards the session's
    /// conversation handle so the assistant starts a new conversation.
    pub async fn dispatch_text(
        &self,
        chat: &ChatTarget,
        text: &str,
        explicit: Option<&str>,
        fresh: bool,
    ) -> Result<()> {
        let resolved = match self.resolve_target(explicit) {
            Ok(session) => session,
            Err(Error::Ambiguous) => {
                return self
                    .send_session_menu(chat, "No conversation is active — pick a session:")
                    .await;
            }
            Err(e) => {
                self.notifier.send_text(chat, &format!("❌ {}", e)).await?;
                return Ok(());
            }
        };

        // Atomic busy check-and-set; losing means another turn is in flight
        let session = match self.registry.begin_turn(&resolved.key) {
            Ok(session) => session,
            Err(Error::Busy(_)) => {
                self.notifier
                    .send_text(
                        chat,
                        &format!(
                            "[{}] ⏳ Assistant is busy — /cancel to stop",
                            resolved.display_label
                        ),
                    )
                    .await?;
                return Ok(());
            }
            Err(e) => {
                self.notifier.send_text(chat, &format!("❌ {}", e)).await?;
                return Ok(());
            }
        };

        if fresh {
            let _ = self.registry.clear_conversation(&session.key);
        }
        let resume = if fresh {
            None
        } else {
            session.conversation_id.clone()
        };

        let prefix = format!("[{}] ", session.display_label);
        let status_ref = match self
            .notifier
            .send_text(chat, &format!("{}Working…", prefix))
            .await
        {
            Ok(message_ref) => Some(message_ref),
            Err(e) => {
                warn!("Failed to send status message: {}", e);
                None
            }
        };

        let (turn_id, rx) = self.runner.execute(TurnRequest {
            session_key: session.key.clone(),
            working_dir: PathBuf::from(&session.key),
            input: text.to_string(),
            resume,
        });
        info!("Dispatched turn {} for {}", turn_id, session.key);

        let relay = TurnRelay {
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            summarizer: self.summarizer.clone(),
            pending: self.pending_permissions.clone(),
            chat: chat.clone(),
            session_key: session.key.clone(),
            label: session.display_label.clone(),
            turn_id,
            status_ref,
            first_turn: session.title.is_none(),
            input: text.to_string(),
        };
        tokio::spawn(relay.run(rx));
        Ok(())
    }

    pub async fn handle_command(&self, chat: &ChatTarget, command: Command) -> Result<()> {
        match command {
            Command::Help => {
                self.notifier.send_text(chat, HELP_TEXT).await?;
            }
            Command::Usage(usage) => {
                self.notifier.send_text(chat, usage).await?;
            }
            Command::Unknown(cmd) => {
                self.notifier
                    .send_text(chat, &format!("Unknown command {} — /help lists commands", cmd))
                    .await?;
            }
            Command::Continue(message) => {
                // Explicitly target the most recent session, window or not
                match self.most_recent_session() {
                    Some(session) => {
                        self.dispatch_text(chat, &message, Some(&session.key), false)
                            .await?;
                    }
                    None => self.dispatch_text(chat, &message, None, false).await?,
                }
            }
            Command::New(message) => {
                let Some(target) = self.current_dir_key() else {
                    self.notifier
                        .send_text(chat, "No directory selected — use /dir <path> first.")
                        .await?;
                    return Ok(());
                };
                match message {
                    Some(message) => {
                        self.dispatch_text(chat, &message, Some(&target), true).await?;
                    }
                    None => {
                        let session = self.registry.get_or_create(&target);
                        if session.status.is_busy() {
                            self.notifier
                                .send_text(
                                    chat,
                                    &format!(
                                        "[{}] ⏳ Assistant is busy — /cancel to stop",
                                        session.display_label
                                    ),
                                )
                                .await?;
                            return Ok(());
                        }
                        let _ = self.registry.clear_conversation(&session.key);
                        self.notifier
                            .send_text(
                                chat,
                                &format!(
                                    "[{}] Fresh conversation — the next message starts clean.",
                                    session.display_label
                                ),
                            )
                            .await?;
                    }
                }
            }
            Command::Switch(Some(path)) => {
                self.switch_to(chat, &path).await?;
            }
            Command::Switch(None) => {
                self.send_directory_menu(chat).await?;
            }
            Command::List => {
                self.send_session_list(chat).await?;
            }
            Command::Remove(path) => {
                let message = match self.registry.remove(&path) {
                    Ok(()) => format!("🗑 Removed session {}", path),
                    Err(Error::NotFound(_)) => format!("❌ No session for {}", path),
                    Err(Error::Busy(_)) => {
                        format!("❌ Session {} is busy — /cancel first", path)
                    }
                    Err(e) => format!("❌ {}", e),
                };
                self.notifier.send_text(chat, &message).await?;
            }
            Command::Resume(Some(id)) => {
                self.attach_conversation(chat, &id).await?;
            }
            Command::Resume(None) => {
                self.send_resume_picker(chat).await?;
            }
            Command::Cancel => {
                self.cancel_active(chat).await?;
            }
            Command::Status => {
                self.send_status(chat).await?;
            }
        }
        Ok(())
    }

    async fn handle_permission_action(&self, chat: &ChatTarget, rest: &str) -> Result<()> {
        let Some((pid, verb)) = rest.rsplit_once(':') else {
            self.notifier.send_text(chat, "Unknown action.").await?;
            return Ok(());
        };
        let approved = verb == "allow";
        let pending = self.pending_permissions.lock().remove(pid);
        let Some(pending) = pending else {
            self.notifier
                .send_text(chat, "No pending permission request.")
                .await?;
            return Ok(());
        };

        match self.runner.resolve_permission(&pending.turn_id, approved) {
            Ok(()) if approved => {
                // The turn resumes; its relay keeps reporting on the
                // retained status message.
                let _ = self
                    .registry
                    .mark(&pending.session_key, SessionStatus::Running, true);
                self.notifier
                    .send_text(chat, "✅ Permission granted — retrying…")
                    .await?;
            }
            Ok(()) => {
                // Denied: the relay reports the Cancelled terminal event.
            }
            Err(_) => {
                // The turn already ended (timeout, cancellation).
                self.notifier
                    .send_text(chat, "No pending permission request.")
                    .await?;
            }
        }
        Ok(())
    }

    fn resolve_target(&self, explicit: Option<&str>) -> Result<Session> {
        if let Some(dir) = explicit {
            return self.registry.resolve(Some(dir));
        }
        match self.registry.resolve(None) {
            Err(Error::Ambiguous) if self.registry.is_empty() => {
                // Brand-new install: fall back to the configured default
                // directory instead of bouncing the very first message.
                let default = self.default_dir.lock().clone();
                match default {
                    Some(dir) => self.registry.resolve(Some(&dir)),
                    None => Err(Error::Ambiguous),
                }
            }
            other => other,
        }
    }

    async fn switch_to(&self, chat: &ChatTarget, raw: &str) -> Result<()> {
        let session = self.registry.get_or_create(raw);
        *self.default_dir.lock() = Some(session.key.clone());

        let mut message = format!("📂 Switched to {}", session.display_label);
        if session.conversation_id.is_none() {
            if let Some(recap) = self.session_recap(&session.key) {
                message.push_str("\n\nPrevious conversation:\n");
                message.push_str(&recap);
            }
        }
        message.push_str("\n\n/resume to pick a stored conversation, or send a message to start.");
        self.notifier.send_text(chat, &message).await?;
        Ok(())
    }

    /// Bulleted recap of the most recent stored conversation for a
    /// directory, shown when switching into a session with no live
    /// conversation yet
    fn session_recap(&self, key: &str) -> Option<String> {
        let dir = Path::new(key);
        let conversation = self.transcripts.latest_conversation(dir)?;
        let messages = self.transcripts.read_messages(&conversation, dir, 5)?;
        let lines: Vec<String> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| format!("• {}", truncate_chars(&m.text.replace('\n', " "), 120)))
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    async fn send_directory_menu(&self, chat: &ChatTarget) -> Result<()> {
        if self.favorite_dirs.is_empty() {
            self.notifier
                .send_text(
                    chat,
                    "No favorite directories configured — use /dir <path> (relative to ~).",
                )
                .await?;
            return Ok(());
        }
        let current = self
            .current_dir_key()
            .map(|k| crate::registry::display_label(&k))
            .unwrap_or_else(|| "none".to_string());
        let options: Vec<Choice> = self
            .favorite_dirs
            .iter()
            .map(|dir| {
                let label = dir.rsplit('/').next().unwrap_or(dir);
                Choice::new(format!("📁 {}", label), format!("switch:{}", dir))
            })
            .collect();
        self.notifier
            .send_choice(
                chat,
                &format!("Favorite directories (current: {}):", current),
                &options,
            )
            .await?;
        Ok(())
    }

    async fn send_session_list(&self, chat: &ChatTarget) -> Result<()> {
        let sessions = self.registry.list();
        if sessions.is_empty() {
            self.notifier.send_text(chat, "No active sessions").await?;
            return Ok(());
        }
        let mut lines = vec!["Active sessions".to_string()];
        for (i, session) in sessions.iter().enumerate() {
            let minutes = (Utc::now() - session.last_activity).num_minutes();
            lines.push(format!(
                "{}. 📂 {} — {} • {}m ago",
                i + 1,
                session.display_label,
                status_text(session.status),
                minutes,
            ));
        }
        let options: Vec<Choice> = sessions
            .iter()
            .map(|s| {
                Choice::new(
                    format!("{}{}", busy_marker(s), s.display_label),
                    format!("switch:{}", s.key),
                )
            })
            .collect();
        self.notifier
            .send_choice(chat, &lines.join("\n"), &options)
            .await?;
        Ok(())
    }

    async fn send_session_menu(&self, chat: &ChatTarget, heading: &str) -> Result<()> {
        let sessions = self.registry.list();
        if sessions.is_empty() {
            self.notifier
                .send_text(chat, "No sessions yet — use /dir <path> to pick a directory.")
                .await?;
            return Ok(());
        }
        let options: Vec<Choice> = sessions
            .iter()
            .map(|s| {
                Choice::new(
                    format!("{}{}", busy_marker(s), s.display_label),
                    format!("switch:{}", s.key),
                )
            })
            .collect();
        self.notifier.send_choice(chat, heading, &options).await?;
        Ok(())
    }

    async fn send_resume_picker(&self, chat: &ChatTarget) -> Result<()> {
        let Some(dir) = self.current_dir_key() else {
            self.notifier
                .send_text(chat, "No directory selected — use /dir <path> first.")
                .await?;
            return Ok(());
        };
        let label = crate::registry::display_label(&dir);
        let recent = self.transcripts.list_recent(Path::new(&dir), 8);
        if recent.is_empty() {
            self.notifier
                .send_text(chat, &format!("No stored conversations for {}.", label))
                .await?;
            return Ok(());
        }
        let options: Vec<Choice> = recent
            .iter()
            .map(|c| {
                Choice::new(
                    format!(
                        "{} — {}",
                        c.modified.format("%d/%m %H:%M"),
                        truncate_chars(&c.first_message.replace('\n', " "), 40)
                    ),
                    format!("resume:{}", c.id),
                )
            })
            .collect();
        self.notifier
            .send_choice(
                chat,
                &format!("📂 {} — pick a conversation to resume:", label),
                &options,
            )
            .await?;
        Ok(())
    }

    /// Attach a stored conversation to its session and show a recap
    async fn attach_conversation(&self, chat: &ChatTarget, conversation_id: &str) -> Result<()> {
        let mut target: Option<(String, Vec<crate::transcripts::TranscriptMessage>)> = None;

        if let Some(dir) = self.current_dir_key() {
            if let Some(messages) =
                self.transcripts
                    .read_messages(conversation_id, Path::new(&dir), 10)
            {
                target = Some((dir, messages));
            }
        }
        if target.is_none() {
            // The id may belong to another directory's store
            if let Some(dir) = self.transcripts.find_working_dir(conversation_id) {
                if let Some(messages) = self.transcripts.read_messages(conversation_id, &dir, 10) {
                    target = Some((normalize_key(&dir.to_string_lossy()), messages));
                }
            }
        }

        let Some((key, messages)) = target else {
            self.notifier
                .send_text(
                    chat,
                    &format!("❌ Conversation not found: {}", truncate_chars(conversation_id, 40)),
                )
                .await?;
            return Ok(());
        };

        let session = self.registry.get_or_create(&key);
        if session.status.is_busy() {
            self.notifier
                .send_text(
                    chat,
                    &format!(
                        "[{}] ⏳ Assistant is busy — /cancel to stop",
                        session.display_label
                    ),
                )
                .await?;
            return Ok(());
        }
        self.registry.set_conversation(&session.key, conversation_id)?;
        *self.default_dir.lock() = Some(session.key.clone());

        let short_id: String = conversation_id.chars().take(8).collect();
        let recap: Vec<String> = messages
            .iter()
            .map(|m| {
                let text = truncate_chars(&m.text.replace('\n', " "), 200);
                match m.role {
                    Role::User => format!("👤 {}", text),
                    Role::Assistant => format!("🤖 {}", text),
                }
            })
            .collect();
        let mut message = format!(
            "📜 Conversation resumed ({}…) in {}",
            short_id, session.display_label
        );
        if !recap.is_empty() {
            message.push_str("\n\n");
            message.push_str(&recap.join("\n"));
        }
        message.push_str("\n\nSend a message to continue.");
        self.notifier.send_text(chat, &message).await?;
        Ok(())
    }

    async fn cancel_active(&self, chat: &ChatTarget) -> Result<()> {
        let Some(session) = self.most_recent_session() else {
            self.notifier.send_text(chat, "Nothing to cancel").await?;
            return Ok(());
        };
        match self.runner.turn_for_session(&session.key) {
            Some(turn_id) if self.runner.cancel(&turn_id) => {
                self.notifier
                    .send_text(chat, &format!("🛑 Cancelling {}…", session.display_label))
                    .await?;
            }
            _ => {
                self.notifier.send_text(chat, "Nothing to cancel").await?;
            }
        }
        Ok(())
    }

    async fn send_status(&self, chat: &ChatTarget) -> Result<()> {
        let sessions = self.registry.list();
        let Some(session) = sessions.first() else {
            self.notifier.send_text(chat, "No sessions.").await?;
            return Ok(());
        };
        let conversation = if session.in_window(Utc::now()) {
            "in conversation"
        } else {
            "window expired"
        };
        let mut message = format!(
            "📂 {}\n{} • {}",
            session.display_label,
            status_text(session.status),
            conversation
        );
        if let Some(title) = &session.title {
            message.push_str(&format!("\n📝 {}", title));
        }
        if sessions.len() > 1 {
            message.push_str(&format!("\n{} sessions total", sessions.len()));
        }
        self.notifier.send_text(chat, &message).await?;
        Ok(())
    }

    fn most_recent_session(&self) -> Option<Session> {
        self.registry.list().into_iter().next()
    }

    fn current_dir_key(&self) -> Option<String> {
        self.most_recent_session()
            .map(|s| s.key)
            .or_else(|| self.default_dir.lock().clone())
    }
}

/// Per-turn relay task: consumes one event stream, talks to the notifier,
/// and releases the session on the terminal event
struct TurnRelay {
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn Notifier>,
    summarizer: Option<Arc<dyn TitleSummarizer>>,
    pending: PendingMap,
    chat: ChatTarget,
    session_key: String,
    label: String,
    turn_id: String,
    status_ref: Option<MessageRef>,
    first_turn: bool,
    input: String,
}

impl TurnRelay {
    async fn run(self, mut rx: mpsc::Receiver<TurnEvent>) {
        let prefix = format!("[{}] ", self.label);
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::StatusTick { label } => {
                    if let Some(status_ref) = &self.status_ref {
                        if let Err(e) = self
                            .notifier
                            .edit_text(status_ref, &format!("{}{}", prefix, label))
                            .await
                        {
                            // The message may have been deleted; keep going
                            debug!("Status edit failed: {}", e);
                        }
                    }
                }
                TurnEvent::PermissionRequested(request) => {
                    self.on_permission(&prefix, request).await;
                }
                TurnEvent::Answer(answer) => {
                    self.on_answer(&prefix, answer).await;
                }
                TurnEvent::Failed { kind, detail } => {
                    let _ = self.registry.finish_turn(&self.session_key, None);
                    self.finish_status(&prefix, "❌ Failed").await;
                    self.send(&format!("{}❌ Turn failed ({}): {}", prefix, kind, detail))
                        .await;
                }
                TurnEvent::Cancelled => {
                    let _ = self.registry.finish_turn(&self.session_key, None);
                    self.finish_status(&prefix, "🛑 Cancelled").await;
                    self.send(&format!("{}🛑 Cancelled", prefix)).await;
                }
            }
        }
        // Drop any permission entries this turn left behind
        self.pending.lock().retain(|_, p| p.turn_id != self.turn_id);
    }

    async fn on_permission(&self, prefix: &str, request: PermissionRequest) {
        if let Err(e) =
            self.registry
                .mark(&self.session_key, SessionStatus::AwaitingPermission, true)
        {
            warn!("Failed to mark session awaiting permission: {}", e);
        }
        let pid = uuid::Uuid::new_v4().simple().to_string();
        self.pending.lock().insert(
            pid.clone(),
            PendingPermission {
                turn_id: self.turn_id.clone(),
                session_key: self.session_key.clone(),
            },
        );
        let text = format!(
            "{}⚠️ Permission needed ({})\n{}",
            prefix, request.kind, request.raw
        );
        let options = [
            Choice::new("✅ Allow", format!("perm:{}:allow", pid)),
            Choice::new("❌ Deny", format!("perm:{}:deny", pid)),
        ];
        if let Err(e) = self.notifier.send_choice(&self.chat, &text, &options).await {
            error!("Failed to surface permission request: {}", e);
        }
    }

    async fn on_answer(&self, prefix: &str, answer: Answer) {
        // Settle the session before surfacing the answer: a follow-up sent
        // the moment the text lands must find the session idle
        if self.first_turn {
            self.store_title(&answer).await;
        }
        let _ = self
            .registry
            .finish_turn(&self.session_key, answer.conversation_id.as_deref());

        self.finish_status(prefix, "✅ Done").await;
        let text = if answer.text.trim().is_empty() {
            "(no output)".to_string()
        } else {
            answer.text.clone()
        };
        self.send(&text).await;
    }

    /// Derive and store the topic title after the first answer
    async fn store_title(&self, answer: &Answer) {
        let derived = match &answer.title_hint {
            Some(hint) => Some(hint.clone()),
            None => match &self.summarizer {
                Some(summarizer) => {
                    let excerpt = title::title_excerpt(&self.input, &answer.text);
                    match summarizer.summarize(&excerpt).await {
                        Ok(title) => Some(title),
                        Err(e) => {
                            warn!("Title summarizer failed: {}", e);
                            None
                        }
                    }
                }
                None => None,
            },
        };
        let derived = derived.unwrap_or_else(|| title::fallback_title(&self.input));
        let formatted = title::format_title(&derived, Some(&self.label));
        let _ = self.registry.set_title(&self.session_key, &formatted);
    }

    async fn finish_status(&self, prefix: &str, marker: &str) {
        if let Some(status_ref) = &self.status_ref {
            let _ = self
                .notifier
                .edit_text(status_ref, &format!("{}{}", prefix, marker))
                .await;
        }
    }

    async fn send(&self, text: &str) {
        if let Err(e) = self.notifier.send_text(&self.chat, text).await {
            error!("Failed to send message: {}", e);
        }
    }
}

fn status_text(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "💤 idle",
        SessionStatus::Running => "🔄 running",
        SessionStatus::AwaitingPermission => "⏸ awaiting permission",
    }
}

fn busy_marker(session: &Session) -> &'static str {
    if session.status.is_busy() { "🔄 " } else { "" }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}
