use std::{collections::HashSet, time::Duration};

use tokio::time::Instant;

use crate::{
    common::errors::NO_ACTIVE_PROMPTS_MESSAGE, configs::ToneShapingConfig, protocol::Prompt,
    session::WeightedPrompt,
};

/// What to do with a weight update that arrived at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// Leading edge: publish immediately.
    Now,
    /// Inside the window: publish the latest value once it closes.
    Deferred(Duration),
}

/// The outcome of recomputing the active set.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishUpdate {
    pub active: Vec<WeightedPrompt>,
    /// Target shelf gain for the tone-shaping stage.
    pub tone_db: f32,
    /// Set when this publish retracts a previously raised no-active error.
    pub cleared: Option<&'static str>,
}

/// Derives the active prompt set and tracks the throttle window.
#[derive(Debug)]
pub struct PromptPublisher {
    interval: Duration,
    last_publish: Option<Instant>,
    filtered: HashSet<String>,
    no_active_raised: bool,
    tone: ToneShapingConfig,
}

impl PromptPublisher {
    pub fn new(interval: Duration, tone: ToneShapingConfig) -> Self {
        Self {
            interval,
            last_publish: None,
            filtered: HashSet::new(),
            no_active_raised: false,
            tone,
        }
    }

    pub fn request(&self, now: Instant) -> Throttle {
        match self.last_publish {
            Some(last) if now.duration_since(last) < self.interval => {
                Throttle::Deferred(self.interval - now.duration_since(last))
            }
            _ => Throttle::Now,
        }
    }

    /// Open a new throttle window at `now`.
    pub fn mark_published(&mut self, now: Instant) {
        self.last_publish = Some(now);
    }

    /// Remember a prompt the service refused. Returns `false` if it was
    /// already known.
    pub fn filter(&mut self, text: &str) -> bool {
        self.filtered.insert(text.to_string())
    }

    pub fn is_filtered(&self, text: &str) -> bool {
        self.filtered.contains(text)
    }

    pub fn filtered(&self) -> Vec<String> {
        let mut texts: Vec<String> = self.filtered.iter().cloned().collect();
        texts.sort();
        texts
    }

    pub fn active_set(&self, prompts: &[Prompt]) -> Vec<WeightedPrompt> {
        prompts
            .iter()
            .filter(|p| p.weight > 0.0 && !self.is_filtered(&p.text))
            .map(Prompt::to_weighted)
            .collect()
    }

    /// Recompute the active set and update the no-active bookkeeping.
    pub fn evaluate(&mut self, prompts: &[Prompt]) -> PublishUpdate {
        let active = self.active_set(prompts);
        let tone_db = if active.iter().any(|p| p.text == self.tone.trigger_prompt) {
            self.tone.cut_db
        } else {
            0.0
        };

        let cleared = if active.is_empty() {
            self.no_active_raised = true;
            None
        } else if std::mem::take(&mut self.no_active_raised) {
            Some(NO_ACTIVE_PROMPTS_MESSAGE)
        } else {
            None
        };

        PublishUpdate {
            active,
            tone_db,
            cleared,
        }
    }
}
