//! Session Registry - the set of known working-directory sessions
//!
//! The registry is the only state shared across concurrent turns. It maps a
//! normalized working-directory key to a session entry whose mutable state
//! sits behind its own lock, so unrelated sessions never contend. The busy
//! check and the transition to `Running` happen under one entry lock
//! ([`SessionRegistry::begin_turn`]), which is the sole mutual-exclusion
//! mechanism serializing turns within a session.

mod types;

pub use types::{
    AUTO_CONTINUE_WINDOW_SECS, Session, SessionKey, SessionStatus, display_label, normalize_key,
    pick_auto_continue,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};

struct SessionState {
    status: SessionStatus,
    last_activity: DateTime<Utc>,
    conversation_id: Option<String>,
    title: Option<String>,
}

struct SessionEntry {
    key: SessionKey,
    label: String,
    state: Mutex<SessionState>,
}

impl SessionEntry {
    fn new(key: SessionKey) -> Self {
        let label = display_label(&key);
        Self {
            key,
            label,
            state: Mutex::new(SessionState {
                status: SessionStatus::Idle,
                last_activity: Utc::now(),
                conversation_id: None,
                title: None,
            }),
        }
    }

    fn snapshot(&self) -> Session {
        let state = self.state.lock();
        Session {
            key: self.key.clone(),
            display_label: self.label.clone(),
            status: state.status,
            last_activity: state.last_activity,
            conversation_id: state.conversation_id.clone(),
            title: state.title.clone(),
        }
    }
}

/// Registry of working-directory sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve which session a message belongs to.
    ///
    /// With an explicit directory the session is looked up or created. With
    /// none, the auto-continue rule applies: the most recently active
    /// session within the window, or [`Error::Ambiguous`].
    pub fn resolve(&self, explicit: Option<&str>) -> Result<Session> {
        match explicit {
            Some(raw) => Ok(self.get_or_create(raw)),
            None => self.auto_continue(),
        }
    }

    /// Look up or create the session for a directory
    pub fn get_or_create(&self, raw: &str) -> Session {
        let key = normalize_key(raw);
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(&key) {
                return entry.snapshot();
            }
        }
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(key.clone())
            .or_insert_with(|| {
                info!("Created session for {}", key);
                Arc::new(SessionEntry::new(key.clone()))
            })
            .clone();
        entry.snapshot()
    }

    /// Look up an existing session without creating it
    pub fn get(&self, raw: &str) -> Option<Session> {
        let key = normalize_key(raw);
        self.sessions.read().get(&key).map(|e| e.snapshot())
    }

    fn auto_continue(&self) -> Result<Session> {
        let now = Utc::now();
        let candidates: Vec<(SessionKey, DateTime<Utc>)> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .map(|e| (e.key.clone(), e.state.lock().last_activity))
                .collect()
        };
        let key = pick_auto_continue(&candidates, now).ok_or(Error::Ambiguous)?;
        self.sessions
            .read()
            .get(&key)
            .map(|e| e.snapshot())
            .ok_or(Error::Ambiguous)
    }

    /// All sessions, most recently active first (ties break on key)
    pub fn list(&self) -> Vec<Session> {
        let mut all: Vec<Session> = {
            let sessions = self.sessions.read();
            sessions.values().map(|e| e.snapshot()).collect()
        };
        all.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.key.cmp(&b.key))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Delete a session record.
    ///
    /// Refuses to drop a session with a turn in flight. The assistant's own
    /// transcript store is untouched.
    pub fn remove(&self, raw: &str) -> Result<()> {
        let key = normalize_key(raw);
        let mut sessions = self.sessions.write();
        let entry = sessions.get(&key).ok_or_else(|| Error::NotFound(key.clone()))?;
        if entry.state.lock().status.is_busy() {
            return Err(Error::Busy(key));
        }
        sessions.remove(&key);
        info!("Removed session {}", key);
        Ok(())
    }

    /// Atomic busy check-and-set: start a turn on an idle session.
    ///
    /// Fails with [`Error::Busy`] if a turn is already running or awaiting
    /// permission, so two near-simultaneous messages can never both win.
    pub fn begin_turn(&self, key: &str) -> Result<Session> {
        let entry = self.entry(key)?;
        let mut state = entry.state.lock();
        if state.status.is_busy() {
            return Err(Error::Busy(entry.key.clone()));
        }
        state.status = SessionStatus::Running;
        state.last_activity = Utc::now();
        drop(state);
        debug!("Turn started for {}", entry.key);
        Ok(entry.snapshot())
    }

    /// Atomic status transition.
    ///
    /// Allowed: Idle -> Running, AwaitingPermission -> Running (approval
    /// resume), Running -> AwaitingPermission, and anything -> Idle. A
    /// successful mark with `touch_activity` slides the auto-continue window
    /// forward.
    pub fn mark(&self, key: &str, status: SessionStatus, touch_activity: bool) -> Result<Session> {
        let entry = self.entry(key)?;
        let mut state = entry.state.lock();
        let valid = match (state.status, status) {
            (_, SessionStatus::Idle) => true,
            (SessionStatus::Idle, SessionStatus::Running) => true,
            (SessionStatus::AwaitingPermission, SessionStatus::Running) => true,
            (SessionStatus::Running, SessionStatus::AwaitingPermission) => true,
            _ => false,
        };
        if !valid {
            return Err(Error::InvalidTransition {
                key: entry.key.clone(),
                from: state.status,
                to: status,
            });
        }
        state.status = status;
        if touch_activity {
            state.last_activity = Utc::now();
        }
        drop(state);
        Ok(entry.snapshot())
    }

    /// Terminal-event bookkeeping: back to idle, activity touched, and the
    /// conversation handle recorded when the assistant reported one.
    pub fn finish_turn(&self, key: &str, conversation_id: Option<&str>) -> Result<Session> {
        let entry = self.entry(key)?;
        let mut state = entry.state.lock();
        state.status = SessionStatus::Idle;
        state.last_activity = Utc::now();
        if let Some(id) = conversation_id {
            state.conversation_id = Some(id.to_string());
        }
        drop(state);
        debug!("Turn finished for {}", entry.key);
        Ok(entry.snapshot())
    }

    /// Attach a conversation handle (used by the resume flow)
    pub fn set_conversation(&self, key: &str, conversation_id: &str) -> Result<()> {
        let entry = self.entry(key)?;
        entry.state.lock().conversation_id = Some(conversation_id.to_string());
        Ok(())
    }

    /// Drop the conversation handle so the next turn starts fresh
    pub fn clear_conversation(&self, key: &str) -> Result<()> {
        let entry = self.entry(key)?;
        entry.state.lock().conversation_id = None;
        Ok(())
    }

    /// Store a derived topic title
    pub fn set_title(&self, key: &str, title: &str) -> Result<()> {
        let entry = self.entry(key)?;
        entry.state.lock().title = Some(title.to_string());
        Ok(())
    }

    fn entry(&self, key: &str) -> Result<Arc<SessionEntry>> {
        self.sessions
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }
}
