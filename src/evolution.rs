//! Trait evolution.
//!
//! Three update rules run at different points of a turn:
//!
//! - [`nudge_from_message`] reacts to the raw user message before anything is
//!   generated. Fixed-direction rules only, no randomness, no growth-log entry.
//! - [`blend_observed`] pulls the traits toward the message's emotion reading,
//!   with the step bounded.
//! - [`evolve`] runs after a reflection exists: keyword deltas on the reflection
//!   text, then uniform drift from a [`Jitter`] source, then a growth-log append.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;

use crate::config::EvolutionConfig;
use crate::persona::types::{GrowthLogEntry, TraitVector};
use crate::signals::emotion::EmotionScores;

// ── Reflection rules ─────────────────────────────────────────────────────────

static REFLECTION_CALM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(落ち着|穏やか|安定|冷静|calm|steady|composed)").unwrap()
});

static REFLECTION_WARMTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(優し|温か|思いやり|寄り添|共感|warm|kind|compassion)").unwrap()
});

static REFLECTION_INTEREST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(興味|好奇|知りたい|学び|探求|curious|interest|explore)").unwrap()
});

pub const REFLECTION_CALM_DELTA: f64 = 0.02;
pub const REFLECTION_EMPATHY_DELTA: f64 = 0.03;
pub const REFLECTION_CURIOSITY_DELTA: f64 = 0.03;

// ── Message rules ────────────────────────────────────────────────────────────

static MESSAGE_GRATITUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(ありがとう|感謝|助かり|thank|grateful)").unwrap());

static MESSAGE_ANGER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(怒|ムカつ|イライラ|腹が立|angry|annoyed|furious)").unwrap()
});

static MESSAGE_REASSURANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(大丈夫|安心|ほっと|落ち着いた|relieved|it's ok|no worries)").unwrap()
});

static MESSAGE_QUESTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\?|？|なぜ|どうして|\bwhy\b|\bhow\b)").unwrap());

pub const NUDGE_GRATITUDE_EMPATHY: f64 = 0.03;
pub const NUDGE_ANGER_CALM: f64 = -0.03;
pub const NUDGE_REASSURANCE_CALM: f64 = 0.02;
pub const NUDGE_QUESTION_CURIOSITY: f64 = 0.02;

// ── Jitter ───────────────────────────────────────────────────────────────────

/// Seedable source of uniform drift in `[-half_width, +half_width]`.
pub struct Jitter {
    rng: StdRng,
    half_width: f64,
}

impl Jitter {
    pub fn new(rng: StdRng, half_width: f64) -> Self {
        let half_width = if half_width.is_finite() { half_width.abs() } else { 0.0 };
        Self { rng, half_width }
    }

    pub fn seeded(seed: u64, half_width: f64) -> Self {
        Self::new(StdRng::seed_from_u64(seed), half_width)
    }

    /// Seeded from `config.seed` when set, otherwise from OS entropy.
    pub fn from_config(config: &EvolutionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rng, config.jitter)
    }

    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    pub fn sample(&mut self) -> f64 {
        if self.half_width == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.half_width..=self.half_width)
    }
}

// ── Evolution ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Evolution {
    pub traits: TraitVector,
    /// The input log with one entry appended, trimmed to the retention bound.
    pub growth_log: Vec<GrowthLogEntry>,
}

impl Evolution {
    /// The entry appended by this evolution.
    pub fn latest(&self) -> Option<&GrowthLogEntry> {
        self.growth_log.last()
    }
}

/// Keyword deltas implied by a reflection text, without drift.
pub fn reflection_deltas(reflection: &str) -> (f64, f64, f64) {
    let pick = |re: &Regex, delta: f64| if re.is_match(reflection) { delta } else { 0.0 };
    (
        pick(&REFLECTION_CALM, REFLECTION_CALM_DELTA),
        pick(&REFLECTION_WARMTH, REFLECTION_EMPATHY_DELTA),
        pick(&REFLECTION_INTEREST, REFLECTION_CURIOSITY_DELTA),
    )
}

/// Evolve `current` from a reflection, stamping the new growth-log entry with `now`.
pub fn evolve_at(
    current: &TraitVector,
    reflection: &str,
    growth_log: &[GrowthLogEntry],
    jitter: &mut Jitter,
    retention: usize,
    now: DateTime<Utc>,
) -> Evolution {
    let (d_calm, d_empathy, d_curiosity) = reflection_deltas(reflection);
    let current = current.clamped();
    let traits = TraitVector::new(
        current.calm + d_calm + jitter.sample(),
        current.empathy + d_empathy + jitter.sample(),
        current.curiosity + d_curiosity + jitter.sample(),
    );

    let retention = retention.max(1);
    let mut log = Vec::with_capacity(growth_log.len().min(retention) + 1);
    let skip = (growth_log.len() + 1).saturating_sub(retention);
    log.extend(growth_log.iter().skip(skip).cloned());
    log.push(GrowthLogEntry::snapshot(&traits, now));

    Evolution {
        traits,
        growth_log: log,
    }
}

pub fn evolve(
    current: &TraitVector,
    reflection: &str,
    growth_log: &[GrowthLogEntry],
    jitter: &mut Jitter,
    retention: usize,
) -> Evolution {
    evolve_at(current, reflection, growth_log, jitter, retention, Utc::now())
}

/// Fixed-direction nudge from the raw user message. Rules stack.
pub fn nudge_from_message(current: &TraitVector, message: &str) -> TraitVector {
    let mut d_calm = 0.0;
    let mut d_empathy = 0.0;
    let mut d_curiosity = 0.0;

    if MESSAGE_GRATITUDE.is_match(message) {
        d_empathy += NUDGE_GRATITUDE_EMPATHY;
    }
    if MESSAGE_ANGER.is_match(message) {
        d_calm += NUDGE_ANGER_CALM;
    }
    if MESSAGE_REASSURANCE.is_match(message) {
        d_calm += NUDGE_REASSURANCE_CALM;
    }
    if MESSAGE_QUESTION.is_match(message) {
        d_curiosity += NUDGE_QUESTION_CURIOSITY;
    }

    current.shifted(d_calm, d_empathy, d_curiosity)
}

/// Blend the emotion reading of a message into `current` at `weight`.
///
/// A reading farther than `max_step` from `current` is first moved toward
/// `current` until it lies at distance `max_step`.
pub fn blend_observed(
    current: &TraitVector,
    scores: &EmotionScores,
    weight: f64,
    max_step: f64,
) -> TraitVector {
    let observed = scores.as_traits(current);
    let distance = current.distance_to(&observed);
    let max_step = max_step.max(0.0);
    let observed = if distance > max_step {
        current.blended(&observed, max_step / distance)
    } else {
        observed
    };
    current.blended(&observed, weight)
}
