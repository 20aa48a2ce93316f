//! Process Runner - supervised execution of assistant turns
//!
//! Executes exactly one logical turn against one session's conversation as
//! a supervised external process and produces a typed event stream:
//! - Periodic status ticks while the process is silent
//! - A two-phase permission protocol (the stream pauses at
//!   `PermissionRequested` until `resolve_permission` is called)
//! - Cooperative cancellation with process-group termination
//! - A hard wall-clock ceiling so a stream never silently hangs

mod events;
mod spinner;
mod stream;

pub use events::{Answer, FailureKind, PermissionKind, PermissionRequest, TurnEvent, TurnId};
pub use stream::{
    AssistantEvent, AssistantMessage, CliEvent, ContentBlock, ErrorEvent, PermissionDenial,
    ResultEvent, SystemEvent, looks_like_quota_error, parse_line,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::title;

/// Runner timing and invocation settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path to the assistant CLI binary
    pub cli_path: String,
    /// Hard wall-clock ceiling for one process invocation
    pub turn_timeout: Duration,
    /// How long a permission request may stay unresolved before it counts
    /// as denied
    pub permission_timeout: Duration,
    /// Status tick cadence while the process is silent
    pub tick_interval: Duration,
    /// Extra system prompt appended to every invocation
    pub append_system_prompt: Option<String>,
}

impl From<&Config> for RunnerConfig {
    fn from(config: &Config) -> Self {
        Self {
            cli_path: config.cli_path.clone(),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            permission_timeout: Duration::from_secs(config.permission_timeout_secs),
            tick_interval: Duration::from_secs(config.status_tick_secs),
            append_system_prompt: config.append_system_prompt.clone(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// One logical turn to execute
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Session this turn belongs to (for bookkeeping only)
    pub session_key: String,
    /// Working directory the process runs in
    pub working_dir: PathBuf,
    /// The prompt to send
    pub input: String,
    /// Conversation handle to continue; `None` starts a fresh conversation
    pub resume: Option<String>,
}

struct TurnHandle {
    session_key: String,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
    permission_tx: Mutex<Option<oneshot::Sender<bool>>>,
}

impl TurnHandle {
    fn cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// What one process invocation produced
struct Invocation {
    text: String,
    conversation_id: Option<String>,
    denials: Vec<PermissionDenial>,
}

enum TurnFailure {
    Cancelled,
    Timeout(u64),
    Spawn(String),
    Process(String),
    Malformed(String),
}

/// Spawns and supervises assistant CLI invocations, one logical turn at a
/// time per `execute` call
pub struct ProcessRunner {
    config: RunnerConfig,
    turns: Mutex<HashMap<TurnId, Arc<TurnHandle>>>,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Execute one turn, returning its id and the event stream.
    ///
    /// The stream is non-empty and ends in exactly one terminal event. The
    /// active-turn record lives only until that terminal event is emitted.
    pub fn execute(self: &Arc<Self>, request: TurnRequest) -> (TurnId, mpsc::Receiver<TurnEvent>) {
        let turn_id: TurnId = uuid::Uuid::new_v4().to_string();
        let handle = Arc::new(TurnHandle {
            session_key: request.session_key.clone(),
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            permission_tx: Mutex::new(None),
        });
        self.turns.lock().insert(turn_id.clone(), handle.clone());

        let (tx, rx) = mpsc::channel(64);
        let runner = self.clone();
        let id = turn_id.clone();
        tokio::spawn(async move {
            runner.run_turn(&id, request, &handle, &tx).await;
            runner.turns.lock().remove(&id);
        });

        (turn_id, rx)
    }

    /// Resolve a pending permission request.
    ///
    /// Approval resumes the same logical turn with a one-shot grant for the
    /// denied actions; denial terminates the turn with `Cancelled`. Fails
    /// with [`Error::NotFound`] when the turn is gone or has no pending
    /// request (e.g. it already timed out).
    pub fn resolve_permission(&self, turn_id: &str, approved: bool) -> Result<()> {
        let handle = self
            .turns
            .lock()
            .get(turn_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(turn_id.to_string()))?;
        let tx = handle
            .permission_tx
            .lock()
            .take()
            .ok_or_else(|| Error::NotFound(turn_id.to_string()))?;
        tx.send(approved)
            .map_err(|_| Error::NotFound(turn_id.to_string()))
    }

    /// Request termination of a turn's underlying process.
    ///
    /// Returns `false` when no such turn is active; the caller reports that
    /// as "nothing to cancel" rather than an error. The turn's stream ends
    /// with `Cancelled` (or `Failed` if the process dies badly first).
    pub fn cancel(&self, turn_id: &str) -> bool {
        match self.turns.lock().get(turn_id) {
            Some(handle) => {
                info!("Cancellation requested for turn {}", turn_id);
                handle.cancel_requested.store(true, Ordering::SeqCst);
                handle.cancel_notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// The active turn for a session, if any
    pub fn turn_for_session(&self, session_key: &str) -> Option<TurnId> {
        self.turns
            .lock()
            .iter()
            .find(|(_, h)| h.session_key == session_key)
            .map(|(id, _)| id.clone())
    }

    /// Supervise one logical turn: invoke the process, loop through
    /// permission rounds, emit exactly one terminal event.
    async fn run_turn(
        &self,
        turn_id: &str,
        request: TurnRequest,
        handle: &Arc<TurnHandle>,
        tx: &mpsc::Sender<TurnEvent>,
    ) {
        let mut resume = request.resume.clone();
        let mut granted: Vec<String> = Vec::new();
        let mut pending_grant = false;

        let terminal = loop {
            let grant = if pending_grant { Some(granted.clone()) } else { None };
            pending_grant = false;

            match self.invoke_once(&request, resume.as_deref(), grant, handle, tx).await {
                Ok(invocation) => {
                    if let Some(id) = &invocation.conversation_id {
                        resume = Some(id.clone());
                    }

                    if !invocation.denials.is_empty() {
                        let permission = permission_request(turn_id, &invocation.denials);
                        let (ptx, prx) = oneshot::channel();
                        *handle.permission_tx.lock() = Some(ptx);
                        if tx
                            .send(TurnEvent::PermissionRequested(permission))
                            .await
                            .is_err()
                        {
                            break TurnEvent::Cancelled;
                        }
                        let approved = self.await_permission(prx, handle).await;
                        handle.permission_tx.lock().take();
                        if !approved {
                            break TurnEvent::Cancelled;
                        }
                        for pattern in invocation.denials.iter().map(|d| d.grant_pattern()) {
                            if !granted.contains(&pattern) {
                                granted.push(pattern);
                            }
                        }
                        pending_grant = true;
                        continue;
                    }

                    let (text, title_hint) = title::extract_title_hint(&invocation.text);
                    break TurnEvent::Answer(Answer {
                        text,
                        title_hint,
                        conversation_id: resume.clone(),
                    });
                }
                Err(TurnFailure::Cancelled) => break TurnEvent::Cancelled,
                Err(TurnFailure::Timeout(secs)) => {
                    break TurnEvent::Failed {
                        kind: FailureKind::Timeout,
                        detail: format!("turn exceeded the {}s ceiling", secs),
                    };
                }
                Err(TurnFailure::Spawn(detail)) => {
                    break TurnEvent::Failed {
                        kind: FailureKind::Spawn,
                        detail,
                    };
                }
                Err(TurnFailure::Process(detail)) => {
                    break TurnEvent::Failed {
                        kind: FailureKind::Exit,
                        detail,
                    };
                }
                Err(TurnFailure::Malformed(detail)) => {
                    break TurnEvent::Failed {
                        kind: FailureKind::MalformedOutput,
                        detail,
                    };
                }
            }
        };

        debug!("Turn {} ended: {:?}", turn_id, terminal_name(&terminal));
        let _ = tx.send(terminal).await;
    }

    /// Run the process once and read its stream to completion
    async fn invoke_once(
        &self,
        request: &TurnRequest,
        resume: Option<&str>,
        grant: Option<Vec<String>>,
        handle: &TurnHandle,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> std::result::Result<Invocation, TurnFailure> {
        if handle.cancelled() {
            return Err(TurnFailure::Cancelled);
        }

        let mut cmd = Command::new(&self.config.cli_path);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(tools) = &grant {
            cmd.arg("--allowed-tools").arg(tools.join(","));
        }
        if let Some(prompt) = &self.config.append_system_prompt {
            cmd.arg("--append-system-prompt").arg(prompt);
        }
        if let Some(id) = resume {
            cmd.arg("--resume").arg(id);
        }
        cmd.arg(&request.input);
        cmd.current_dir(&request.working_dir);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group so cancellation reaches spawned children too
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            "Invoking assistant in {} (resume={:?}, grant={:?})",
            request.working_dir.display(),
            resume,
            grant
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| TurnFailure::Spawn(format!("{}: {}", self.config.cli_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TurnFailure::Spawn("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TurnFailure::Spawn("failed to capture stderr".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();

        let deadline = tokio::time::sleep(self.config.turn_timeout);
        tokio::pin!(deadline);
        let cancelled = handle.cancel_notify.notified();
        tokio::pin!(cancelled);

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.tick_interval,
            self.config.tick_interval,
        );
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ticks = 0usize;

        let mut saw_output = false;
        let mut accumulated = String::new();
        let mut system_session: Option<String> = None;
        let mut result_event: Option<stream::ResultEvent> = None;
        let mut error_message: Option<String> = None;

        let failure = loop {
            tokio::select! {
                _ = &mut cancelled => {
                    kill_process_group(&mut child).await;
                    break Some(TurnFailure::Cancelled);
                }
                _ = &mut deadline => {
                    warn!("Turn timed out, killing process");
                    kill_process_group(&mut child).await;
                    break Some(TurnFailure::Timeout(self.config.turn_timeout.as_secs()));
                }
                _ = tick.tick(), if !saw_output => {
                    let _ = tx.send(TurnEvent::StatusTick { label: spinner::label(ticks) }).await;
                    ticks += 1;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match parse_line(&line) {
                        Some(CliEvent::System(ev)) => {
                            if ev.session_id.is_some() {
                                system_session = ev.session_id;
                            }
                        }
                        Some(CliEvent::Assistant(ev)) => {
                            let text = ev.text();
                            if !text.trim().is_empty() {
                                saw_output = true;
                                accumulated.push_str(&text);
                            }
                        }
                        Some(CliEvent::Result(ev)) => {
                            saw_output = true;
                            result_event = Some(ev);
                        }
                        Some(CliEvent::Error(ev)) => {
                            let message = ev.message();
                            warn!("Assistant error event: {}", message);
                            error_message = Some(message);
                        }
                        Some(CliEvent::Other) => {}
                        None => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() && error_message.is_none() {
                                debug!("Non-JSON output: {}", trimmed);
                                error_message = Some(trimmed.to_string());
                            }
                        }
                    },
                    Ok(None) => break None,
                    Err(e) => {
                        error_message = Some(e.to_string());
                        break None;
                    }
                }
            }
        };

        if let Some(failure) = failure {
            let _ = stderr_task.await;
            return Err(failure);
        }

        // Stdout closed; the process should exit promptly
        let status = match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(TurnFailure::Process(format!("wait failed: {}", e))),
            Err(_) => {
                kill_process_group(&mut child).await;
                return Err(TurnFailure::Process(
                    "process did not exit after closing its output".to_string(),
                ));
            }
        };
        let stderr_text = stderr_task.await.unwrap_or_default();

        if handle.cancelled() {
            return Err(TurnFailure::Cancelled);
        }

        let result_text = result_event
            .as_ref()
            .and_then(|r| r.result.clone())
            .filter(|t| !t.trim().is_empty());
        let response_text = result_text.clone().unwrap_or_else(|| accumulated.clone());

        if !status.success() {
            let mut detail = error_message
                .or_else(|| {
                    let tail = stderr_text.trim();
                    (!tail.is_empty()).then(|| tail.to_string())
                })
                .unwrap_or_else(|| match status.code() {
                    Some(code) => format!("process exited with code {}", code),
                    None => "process terminated by signal".to_string(),
                });
            if looks_like_quota_error(&detail) || looks_like_quota_error(&response_text) {
                detail = format!("usage limit reached: {}", detail);
            }
            return Err(TurnFailure::Process(detail));
        }

        match result_event {
            Some(res) => Ok(Invocation {
                text: response_text,
                conversation_id: res.session_id.or(system_session),
                denials: res.permission_denials,
            }),
            None if !accumulated.trim().is_empty() => Ok(Invocation {
                text: accumulated,
                conversation_id: system_session,
                denials: Vec::new(),
            }),
            None => Err(TurnFailure::Malformed(error_message.unwrap_or_else(|| {
                "stream ended without a result event".to_string()
            }))),
        }
    }

    /// Park until the permission request is resolved. Denial, cancellation,
    /// timeout, and a vanished caller all count as "not approved".
    async fn await_permission(
        &self,
        prx: oneshot::Receiver<bool>,
        handle: &TurnHandle,
    ) -> bool {
        let cancelled = handle.cancel_notify.notified();
        tokio::pin!(cancelled);
        if handle.cancelled() {
            return false;
        }
        tokio::select! {
            resolution = prx => resolution.unwrap_or(false),
            _ = &mut cancelled => false,
            _ = tokio::time::sleep(self.config.permission_timeout) => {
                warn!("Permission request timed out, treating as denied");
                false
            }
        }
    }
}

fn permission_request(turn_id: &str, denials: &[PermissionDenial]) -> PermissionRequest {
    let first = &denials[0];
    let raw = denials
        .iter()
        .map(|d| d.describe())
        .collect::<Vec<_>>()
        .join("\n");
    PermissionRequest {
        turn_id: turn_id.to_string(),
        kind: first.kind(),
        target: first.target(),
        raw,
    }
}

fn terminal_name(event: &TurnEvent) -> &'static str {
    match event {
        TurnEvent::StatusTick { .. } => "status_tick",
        TurnEvent::PermissionRequested(_) => "permission_requested",
        TurnEvent::Answer(_) => "answer",
        TurnEvent::Failed { .. } => "failed",
        TurnEvent::Cancelled => "cancelled",
    }
}

/// Terminate the child's whole process group: TERM, a short grace period,
/// then KILL. Falls back to killing the direct child where process groups
/// are unavailable.
async fn kill_process_group(child: &mut Child) {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            // The child was spawned into its own group, so pgid == pid.
            // pgid <= 1 would signal every user process.
            if pid > 1 {
                let pgid = Pid::from_raw(pid as i32);
                if killpg(pgid, Signal::SIGTERM).is_ok() {
                    if tokio::time::timeout(Duration::from_secs(3), child.wait())
                        .await
                        .is_ok()
                    {
                        return;
                    }
                    let _ = killpg(pgid, Signal::SIGKILL);
                    let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
                    return;
                }
            }
        }
    }

    let _ = child.start_kill();
    let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
}
