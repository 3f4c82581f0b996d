//! Inbound events from the playback controller, VAD and STT.

use crate::activity::AgentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_confidence() -> f32 {
    1.0
}

/// Everything the arbiter consumes, as one tagged enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArbiterEvent {
    AgentStateChanged {
        #[serde(default)]
        old_state: Option<AgentState>,
        new_state: AgentState,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    AudioPlaybackChanged {
        is_playing: bool,
    },
    VadSpeechStarted,
    VadSpeechEnded,
    TranscriptReceived {
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default = "default_confidence")]
        confidence: f32,
    },
}

impl ArbiterEvent {
    pub fn state_changed(old_state: AgentState, new_state: AgentState) -> Self {
        ArbiterEvent::AgentStateChanged {
            old_state: Some(old_state),
            new_state,
            timestamp: Utc::now(),
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        ArbiterEvent::TranscriptReceived {
            text: text.into(),
            is_final: false,
            confidence: default_confidence(),
        }
    }

    pub fn final_transcript(text: impl Into<String>) -> Self {
        ArbiterEvent::TranscriptReceived {
            text: text.into(),
            is_final: true,
            confidence: default_confidence(),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ArbiterEvent::AgentStateChanged { .. } => "agent_state_changed",
            ArbiterEvent::AudioPlaybackChanged { .. } => "audio_playback_changed",
            ArbiterEvent::VadSpeechStarted => "vad_speech_started",
            ArbiterEvent::VadSpeechEnded => "vad_speech_ended",
            ArbiterEvent::TranscriptReceived { .. } => "transcript_received",
        }
    }
}
