//! Shared data model: prompts, playback state, control changes, wire chunks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound of the prompt weight range exposed to users.
pub const MAX_PROMPT_WEIGHT: f32 = 2.0;

/// A user-authored steering instruction for the generator.
///
/// `prompt_id` is stable for the life of the board; filtering by the
/// backend is keyed on `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub prompt_id: String,
    pub text: String,
    pub weight: f32,
    pub cc: u8,
    pub color: String,
}

impl Prompt {
    pub fn new(prompt_id: impl Into<String>, text: impl Into<String>, weight: f32, cc: u8) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            text: text.into(),
            weight,
            cc,
            color: String::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// The wire form sent to the backend.
    pub fn weighted(&self) -> WeightedPrompt {
        WeightedPrompt {
            text: self.text.clone(),
            weight: self.weight,
        }
    }
}

/// Prompt as the backend sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f32,
}

/// A prompt the backend refused to honor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredPrompt {
    pub text: String,
    pub reason: String,
}

/// One unit of generated audio as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Base64 text of interleaved little-endian PCM16.
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl AudioChunk {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: None,
        }
    }
}

/// Playback state machine. The coordinator is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Whether incoming audio may be scheduled in this state.
    pub fn accepts_audio(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// A MIDI Control Change from the active input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChange {
    pub channel: u8,
    pub cc: u8,
    pub value: u8,
}
