//! Text signal extractors.
//!
//! Every extractor is a pure function of the input text over static keyword
//! tables. [`extract`] runs all of them for one inbound message; callers that
//! only need one signal call the submodule directly.

pub mod emotion;
pub mod intent;
pub mod safety;
pub mod self_ref;
pub mod semantic;

use serde::Serialize;

use emotion::EmotionScores;
use intent::IntentReading;
use safety::SafetyReport;
use self_ref::SelfReferentInfo;
use semantic::SemanticFrame;

/// All extractor outputs for one message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalReport {
    pub emotion: EmotionScores,
    pub intent: IntentReading,
    pub semantic: SemanticFrame,
    pub self_ref: SelfReferentInfo,
    pub safety: SafetyReport,
}

/// Run every extractor over `text`. `previous` is the prior turn's self-referent
/// result for the same session, if any.
pub fn extract(text: &str, previous: Option<&SelfReferentInfo>) -> SignalReport {
    SignalReport {
        emotion: emotion::score_emotions(text),
        intent: intent::classify_intent(text),
        semantic: semantic::map_concepts(text),
        self_ref: self_ref::analyze_self_reference(text, previous),
        safety: safety::assess(text),
    }
}
