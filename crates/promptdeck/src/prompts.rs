//! The prompt board: the ordered, user-editable set of prompts.
//!
//! The board owns prompt weights. Knob turns arrive as MIDI Control Changes
//! and are mapped onto every prompt bound to that controller. The
//! coordinator only ever sees snapshots taken from here.

use deckconf::PromptSeed;

use crate::primitives::{ControlChange, Prompt, MAX_PROMPT_WEIGHT};

/// Map a 7-bit controller value onto the prompt weight range.
pub fn weight_from_cc(value: u8) -> f32 {
    f32::from(value.min(127)) / 127.0 * MAX_PROMPT_WEIGHT
}

#[derive(Debug, Clone, Default)]
pub struct PromptBoard {
    prompts: Vec<Prompt>,
}

impl PromptBoard {
    pub fn new(prompts: Vec<Prompt>) -> Self {
        Self { prompts }
    }

    /// Build a board from config seeds; ids are `prompt-<index>`.
    pub fn from_seeds(seeds: &[PromptSeed]) -> Self {
        let prompts = seeds
            .iter()
            .enumerate()
            .map(|(i, seed)| {
                Prompt::new(
                    format!("prompt-{i}"),
                    seed.text.clone(),
                    seed.weight.clamp(0.0, MAX_PROMPT_WEIGHT),
                    seed.cc,
                )
                .with_color(seed.color.clone())
            })
            .collect();
        Self { prompts }
    }

    pub fn snapshot(&self) -> Vec<Prompt> {
        self.prompts.clone()
    }

    pub fn get(&self, prompt_id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.prompt_id == prompt_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.iter()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Resolve a prompt by id or by its position on the board.
    pub fn resolve(&self, key: &str) -> Option<&Prompt> {
        self.get(key).or_else(|| {
            key.parse::<usize>()
                .ok()
                .and_then(|index| self.prompts.get(index))
        })
    }

    /// Set a weight, clamped to the valid range. Returns false for unknown ids.
    pub fn set_weight(&mut self, prompt_id: &str, weight: f32) -> bool {
        match self.prompts.iter_mut().find(|p| p.prompt_id == prompt_id) {
            Some(prompt) => {
                prompt.weight = weight.clamp(0.0, MAX_PROMPT_WEIGHT);
                true
            }
            None => false,
        }
    }

    /// Apply a knob turn to every prompt bound to its controller.
    ///
    /// Returns the prompts that changed.
    pub fn apply_control_change(&mut self, change: &ControlChange) -> Vec<Prompt> {
        let weight = weight_from_cc(change.value);
        self.prompts
            .iter_mut()
            .filter(|p| p.cc == change.cc)
            .map(|p| {
                p.weight = weight;
                p.clone()
            })
            .collect()
    }
}
