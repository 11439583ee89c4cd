use serde::{Deserialize, Serialize};

use crate::session::WeightedPrompt;

pub const MIN_WEIGHT: f32 = 0.0;
pub const MAX_WEIGHT: f32 = 2.0;

/// A mixer channel: text steering the generator and its current weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub text: String,
    pub weight: f32,
    /// MIDI controller number bound to the weight knob.
    #[serde(default)]
    pub cc: u8,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Prompt {
    pub fn new(id: impl Into<String>, text: impl Into<String>, weight: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            weight: weight.clamp(MIN_WEIGHT, MAX_WEIGHT),
            cc: 0,
            color: String::new(),
            description: None,
        }
    }

    /// NaN weights are treated as silent.
    pub fn clamped(mut self) -> Self {
        self.weight = if self.weight.is_nan() {
            MIN_WEIGHT
        } else {
            self.weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
        };
        self
    }

    pub fn to_weighted(&self) -> WeightedPrompt {
        WeightedPrompt {
            text: self.text.clone(),
            weight: self.weight,
        }
    }
}

const DECK: [(&str, &str); 16] = [
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
    ("Dystopian Industrial", "#d9b2ff"),
];

/// Number of deck prompts that start audible.
const INITIALLY_ACTIVE: usize = 3;

/// The startup prompt set, one prompt per MIDI CC 0..16.
pub fn default_deck() -> Vec<Prompt> {
    DECK.iter()
        .enumerate()
        .map(|(i, (text, color))| Prompt {
            id: format!("prompt-{}", i),
            text: (*text).to_string(),
            weight: if i < INITIALLY_ACTIVE { 1.0 } else { 0.0 },
            cc: i as u8,
            color: (*color).to_string(),
            description: None,
        })
        .collect()
}
