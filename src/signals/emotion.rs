//! Keyword-based emotion scoring along the three trait axes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::persona::types::TraitVector;

static CALM_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(落ち着|穏やか|安心|静か|ゆっくり|のんびり|calm|relax|peace|quiet)").unwrap()
});

static EMPATHY_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(ありがとう|優し|嬉し|共感|わかる|大切|thank|kind|care|love|glad)").unwrap()
});

static CURIOSITY_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(なぜ|どうして|知りたい|興味|面白|不思議|why|how|curious|wonder|interesting)")
        .unwrap()
});

/// Per-axis keyword density, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmotionScores {
    pub calm: f64,
    pub empathy: f64,
    pub curiosity: f64,
}

impl EmotionScores {
    /// Trait reading implied by these scores. An axis with hits maps its density
    /// onto the upper half of the trait range; an axis without hits was not
    /// observed and keeps `current`.
    pub fn as_traits(&self, current: &TraitVector) -> TraitVector {
        let observe = |score: f64, now: f64| if score > 0.0 { 0.5 + 0.5 * score } else { now };
        TraitVector::new(
            observe(self.calm, current.calm),
            observe(self.empathy, current.empathy),
            observe(self.curiosity, current.curiosity),
        )
    }
}

/// Score `text` by counting keyword hits per axis, normalized by
/// `min(1, hits / (char_len / 5))`.
pub fn score_emotions(text: &str) -> EmotionScores {
    let len = text.chars().count();
    if len == 0 {
        return EmotionScores {
            calm: 0.0,
            empathy: 0.0,
            curiosity: 0.0,
        };
    }
    let scale = len as f64 / 5.0;
    let score = |re: &Regex| (re.find_iter(text).count() as f64 / scale).min(1.0);

    EmotionScores {
        calm: score(&CALM_WORDS),
        empathy: score(&EMPATHY_WORDS),
        curiosity: score(&CURIOSITY_WORDS),
    }
}
