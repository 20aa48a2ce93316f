//! Transcriber - the audio transcription abstraction
//!
//! Voice input is transcribed by the message-intake path before the
//! dispatcher ever sees it; the core only consumes the resulting text.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// A finished transcription
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub duration_secs: Option<f32>,
    /// Which engine produced the text
    pub engine: String,
}

impl Transcript {
    /// "m:ss" style duration, or "?" when unknown
    pub fn duration_formatted(&self) -> String {
        match self.duration_secs {
            Some(secs) => {
                let total = secs.round() as u64;
                format!("{}:{:02}", total / 60, total % 60)
            }
            None => "?".to_string(),
        }
    }
}

/// Audio transcription interface
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript>;
}

/// Frame a transcription as assistant input, the way the intake path
/// forwards voice messages
pub fn frame_transcript(transcript: &Transcript) -> String {
    format!(
        "[Voice transcription ({}, {})]\n\n{}",
        transcript.duration_formatted(),
        transcript.engine,
        transcript.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_formatted() {
        let t = Transcript {
            text: "hi".into(),
            duration_secs: Some(75.2),
            engine: "whisper".into(),
        };
        assert_eq!(t.duration_formatted(), "1:15");

        let unknown = Transcript {
            text: "hi".into(),
            duration_secs: None,
            engine: "whisper".into(),
        };
        assert_eq!(unknown.duration_formatted(), "?");
    }

    #[test]
    fn test_frame_transcript() {
        let t = Transcript {
            text: "deploy the fix".into(),
            duration_secs: Some(4.0),
            engine: "whisper".into(),
        };
        let framed = frame_transcript(&t);
        assert!(framed.starts_with("[Voice transcription (0:04, whisper)]"));
        assert!(framed.ends_with("deploy the fix"));
    }
}
