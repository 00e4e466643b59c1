//! Coarse intent and emotion labelling from keyword buckets.
//!
//! Buckets are evaluated in a fixed order. The intent is taken from the first
//! bucket that matches; the emotion label from the last matching bucket that
//! carries one. Ties are therefore resolved by table order alone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

struct Bucket {
    pattern: Regex,
    intent: &'static str,
    emotion: Option<&'static str>,
}

static BUCKETS: Lazy<Vec<Bucket>> = Lazy::new(|| {
    let bucket = |pattern: &str, intent, emotion| Bucket {
        pattern: Regex::new(pattern).unwrap(),
        intent,
        emotion,
    };
    vec![
        bucket(r"(?i)(\?|？|なぜ|どうして|教えて|\bwhat\b|\bwhy\b|\bhow\b)", "question", None),
        bucket(r"(?i)(ありがとう|感謝|助かった|thank)", "gratitude", None),
        bucket(r"(?i)(悲し|寂し|つらい|泣|落ち込|\bsad\b|lonely|cry)", "support", Some("sad")),
        bucket(r"(?i)(知りたい|興味|気になる|面白|curious|wonder)", "exploration", Some("curious")),
        bucket(r"(?i)(好き|大好き|会いたい|嬉し|\blove\b|miss you)", "affection", Some("warm")),
        bucket(r"(?i)(怒|ムカつ|イライラ|うざ|許せない|angry|annoyed|hate)", "complaint", Some("angry")),
    ]
});

pub const DEFAULT_INTENT: &str = "conversation";
pub const DEFAULT_EMOTION: &str = "neutral";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentReading {
    pub intent: String,
    pub emotion: String,
    pub confidence: f64,
}

pub fn classify_intent(text: &str) -> IntentReading {
    let mut intent: Option<&'static str> = None;
    let mut emotion = DEFAULT_EMOTION;

    for bucket in BUCKETS.iter() {
        if !bucket.pattern.is_match(text) {
            continue;
        }
        intent.get_or_insert(bucket.intent);
        if let Some(label) = bucket.emotion {
            emotion = label;
        }
    }

    let len = text.chars().count();
    let confidence = if len < 5 {
        0.5
    } else {
        (0.5 + len as f64 / 200.0).min(1.0)
    };

    IntentReading {
        intent: intent.unwrap_or(DEFAULT_INTENT).to_string(),
        emotion: emotion.to_string(),
        confidence,
    }
}
