//! Bootstrap configuration - seeds runtime state, then runtime owns it.

use serde::{Deserialize, Serialize};

/// One prompt on the initial board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSeed {
    pub text: String,

    /// MIDI controller number bound to this prompt's weight.
    pub cc: u8,

    #[serde(default = "PromptSeed::default_color")]
    pub color: String,

    #[serde(default)]
    pub weight: f32,
}

impl PromptSeed {
    pub fn new(text: impl Into<String>, cc: u8, color: impl Into<String>, weight: f32) -> Self {
        Self {
            text: text.into(),
            cc,
            color: color.into(),
            weight,
        }
    }

    fn default_color() -> String {
        "#9900ff".to_string()
    }
}

/// Default prompt palette. The first three start audible.
pub fn default_prompts() -> Vec<PromptSeed> {
    [
        ("Bossa Nova", "#9900ff"),
        ("Chillwave", "#5200ff"),
        ("Drum and Bass", "#ff25f6"),
        ("Post Punk", "#2af6de"),
        ("Shoegaze", "#ffdd28"),
        ("Funk", "#2af6de"),
        ("Chiptune", "#9900ff"),
        ("Lush Strings", "#3dffab"),
        ("Sparkling Arpeggios", "#d8ff3e"),
        ("Staccato Rhythms", "#d9b2ff"),
        ("Punchy Kick", "#3dffab"),
        ("Dubstep", "#ffdd28"),
        ("K Pop", "#ff25f6"),
        ("Neo Soul", "#d8ff3e"),
        ("Trip Hop", "#5200ff"),
        ("Thrash", "#d9b2ff"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (text, color))| {
        let weight = if i < 3 { 1.0 } else { 0.0 };
        PromptSeed::new(text, i as u8, color, weight)
    })
    .collect()
}

/// MIDI input preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MidiConfig {
    /// Preferred input device id. None selects the first enumerated device.
    #[serde(default)]
    pub device: Option<String>,
}

/// All bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_prompts")]
    pub prompts: Vec<PromptSeed>,

    #[serde(default)]
    pub midi: MidiConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            prompts: default_prompts(),
            midi: MidiConfig::default(),
        }
    }
}
