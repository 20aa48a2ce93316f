//! Liaison Core - chat-to-assistant bridge orchestration
//!
//! This crate provides the core functionality for the Liaison bridge:
//! - Session registry keyed by working directory, with auto-continue routing
//! - Supervised assistant CLI execution with a typed turn-event stream
//! - Interactive permission mediation and cancellation
//! - Dispatch of inbound messages and operator commands
//! - Collaborator interfaces for the chat transport, transcription, and
//!   topic titling

pub mod config;
pub mod dispatch;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod runner;
pub mod title;
pub mod transcribe;
pub mod transcripts;

pub use config::Config;
pub use error::{Error, Result};

// Registry exports
pub use registry::{
    AUTO_CONTINUE_WINDOW_SECS, Session, SessionKey, SessionRegistry, SessionStatus,
};

// Runner exports
pub use runner::{
    Answer, FailureKind, PermissionKind, PermissionRequest, ProcessRunner, RunnerConfig,
    TurnEvent, TurnId, TurnRequest,
};

// Dispatch exports
pub use dispatch::{Command, Dispatcher, HELP_TEXT};

// Collaborator interfaces
pub use notifier::{ChatTarget, Choice, MessageRef, Notifier};
pub use title::TitleSummarizer;
pub use transcribe::{Transcriber, Transcript};
pub use transcripts::TranscriptStore;
