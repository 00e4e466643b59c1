//! Core persona type definitions.
//!
//! Defines [`TraitVector`] (the calm/empathy/curiosity state), [`GrowthLogEntry`]
//! (trait snapshots over time), [`Message`] and [`Role`] (the conversation log),
//! [`SessionSummary`] (compaction archive rows), [`MetaReport`] and the persisted
//! [`PersonaRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Neutral value used for any missing or non-finite trait input.
pub const NEUTRAL: f64 = 0.5;

/// Map any float into `[0, 1]`; NaN and infinities become [`NEUTRAL`].
pub fn sanitize_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        NEUTRAL
    }
}

/// The three-axis persona state. Every field is always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTraits")]
pub struct TraitVector {
    pub calm: f64,
    pub empathy: f64,
    pub curiosity: f64,
}

/// Lenient wire shape: any JSON per field, numbers are sanitized, anything else is neutral.
#[derive(Deserialize)]
struct RawTraits {
    #[serde(default)]
    calm: serde_json::Value,
    #[serde(default)]
    empathy: serde_json::Value,
    #[serde(default)]
    curiosity: serde_json::Value,
}

impl From<RawTraits> for TraitVector {
    fn from(raw: RawTraits) -> Self {
        Self::from_options(raw.calm.as_f64(), raw.empathy.as_f64(), raw.curiosity.as_f64())
    }
}

impl Default for TraitVector {
    fn default() -> Self {
        Self::neutral()
    }
}

impl TraitVector {
    pub fn new(calm: f64, empathy: f64, curiosity: f64) -> Self {
        Self {
            calm: sanitize_unit(calm),
            empathy: sanitize_unit(empathy),
            curiosity: sanitize_unit(curiosity),
        }
    }

    pub fn neutral() -> Self {
        Self {
            calm: NEUTRAL,
            empathy: NEUTRAL,
            curiosity: NEUTRAL,
        }
    }

    /// Build from possibly-missing values; `None` becomes neutral.
    pub fn from_options(calm: Option<f64>, empathy: Option<f64>, curiosity: Option<f64>) -> Self {
        Self::new(
            calm.unwrap_or(NEUTRAL),
            empathy.unwrap_or(NEUTRAL),
            curiosity.unwrap_or(NEUTRAL),
        )
    }

    /// Re-apply the `[0, 1]` invariant after raw field arithmetic.
    pub fn clamped(self) -> Self {
        Self::new(self.calm, self.empathy, self.curiosity)
    }

    /// Add per-axis deltas and clamp.
    pub fn shifted(self, d_calm: f64, d_empathy: f64, d_curiosity: f64) -> Self {
        Self::new(
            self.calm + d_calm,
            self.empathy + d_empathy,
            self.curiosity + d_curiosity,
        )
    }

    /// Move toward `target` by `weight` (clamped to `[0, 1]`); returns a new vector.
    pub fn blended(&self, target: &TraitVector, weight: f64) -> Self {
        let w = sanitize_unit(weight);
        Self::new(
            self.calm * (1.0 - w) + target.calm * w,
            self.empathy * (1.0 - w) + target.empathy * w,
            self.curiosity * (1.0 - w) + target.curiosity * w,
        )
    }

    /// Euclidean distance between two vectors.
    pub fn distance_to(&self, other: &TraitVector) -> f64 {
        ((self.calm - other.calm).powi(2)
            + (self.empathy - other.empathy).powi(2)
            + (self.curiosity - other.curiosity).powi(2))
        .sqrt()
    }

    pub fn average(&self) -> f64 {
        (self.calm + self.empathy + self.curiosity) / 3.0
    }
}

/// One snapshot of the trait vector, appended after every evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthLogEntry {
    pub calm: f64,
    pub empathy: f64,
    pub curiosity: f64,
    pub timestamp: DateTime<Utc>,
}

impl GrowthLogEntry {
    pub fn snapshot(traits: &TraitVector, timestamp: DateTime<Utc>) -> Self {
        Self {
            calm: traits.calm,
            empathy: traits.empathy,
            curiosity: traits.curiosity,
            timestamp,
        }
    }

    pub fn traits(&self) -> TraitVector {
        TraitVector::new(self.calm, self.empathy, self.curiosity)
    }
}

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Ai,
}

impl Role {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "ai" => Ok(Self::Ai),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A conversation message, matching the `messages` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

/// Compaction archive record, matching the `session_summaries` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub user_id: String,
    pub session_id: String,
    pub summary: String,
    pub created_at: String,
}

/// Outcome of a meta-reflection analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaReport {
    pub summary: String,
    /// Assessed growth in `[0, 1]`.
    pub growth_adjustment: f64,
    pub next_focus: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The persisted per-user persona row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRecord {
    pub user_id: String,
    pub traits: TraitVector,
    pub reflection: String,
    pub meta_summary: String,
    pub growth: f64,
    /// Completed turns, used to schedule meta-reflection.
    pub turn_count: u64,
    pub updated_at: String,
}

impl PersonaRecord {
    /// A fresh persona for a user seen for the first time.
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            traits: TraitVector::neutral(),
            reflection: String::new(),
            meta_summary: String::new(),
            growth: 0.0,
            turn_count: 0,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}
