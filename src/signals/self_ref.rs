//! Who an utterance is about, and what the user wants to know about the persona.
//!
//! [`analyze_self_reference`] runs referent detection, then (for AI-directed or
//! joint utterances only) target and nuance detection, then scores confidence.
//! The previous turn's result is passed in explicitly and biases referent
//! detection through the continuation rule.
//!
//! [`apply_self_constraints`] adjusts a generated reply for AI-directed turns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Referent {
    User,
    Ai,
    Mixed,
    Third,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTarget {
    Persona,
    Traits,
    Behavior,
    Memory,
    Safety,
    Cognitive,
    Os,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nuance {
    EvaluationRequest,
    ExplanationRequest,
    PreferenceRequest,
    MetaQuestion,
    BoundaryCheck,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfReferentInfo {
    pub referent: Referent,
    pub self_target: SelfTarget,
    pub nuance: Nuance,
    pub confidence: f64,
    /// The previous turn's result, one level deep.
    pub previous: Option<Box<SelfReferentInfo>>,
}

impl SelfReferentInfo {
    pub fn is_about_ai(&self) -> bool {
        matches!(self.referent, Referent::Ai | Referent::Mixed)
    }

    /// Copy without the `previous` link, for chaining into the next turn.
    pub fn detached(&self) -> Self {
        Self {
            previous: None,
            ..self.clone()
        }
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static AI_DIRECTED: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(あなた|君|きみ|お前|シグマリス|sigmaris|\byou\b|\byour\b|\byourself\b|\bai\b|ＡＩ)")
});

static USER_SELF: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(私|僕|俺|わたし|ぼく|自分|\bi\b|\bme\b|\bmy\b|\bmyself\b)")
});

static INCLUSIVE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(あなたと私|君と僕|私たち|僕たち|僕ら|我々|一緒に|you and i|you and me|\bwe\b|\bus\b|\bour\b)")
});

static THIRD_PARTY: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(彼女|彼|あの人|友達|家族|先生|上司|母|父|\bhe\b|\bshe\b|\bthey\b|\bhim\b|\bher\b|\bfriend\b)")
});

static CONTINUATION: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(それ|その|じゃあ|では|さっき|続けて|もっと|\bthen\b|\bthat\b|what about|\bmore\b)")
});

static TARGETS: Lazy<Vec<(SelfTarget, Regex)>> = Lazy::new(|| {
    vec![
        (SelfTarget::Persona, re(r"(?i)(性格|人格|キャラ|personality|persona|character)")),
        (SelfTarget::Traits, re(r"(?i)(落ち着き|共感|好奇心|\bcalm\b|empathy|curiosity|trait)")),
        (SelfTarget::Behavior, re(r"(?i)(話し方|口調|返事|振る舞い|\btone\b|behav|respond|answer)")),
        (SelfTarget::Memory, re(r"(?i)(覚え|記憶|忘れ|remember|memory|forget)")),
        (SelfTarget::Safety, re(r"(?i)(安全|危険|制限|ルール|\bsafe|\brules?\b|restrict|allowed)")),
        (SelfTarget::Cognitive, re(r"(?i)(考え|思考|理解|感じ|think|understand|feel|conscious)")),
        (SelfTarget::Os, re(r"(?i)(システム|プログラム|モデル|\bos\b|system|program|model)")),
    ]
});

static NUANCES: Lazy<Vec<(Nuance, Regex)>> = Lazy::new(|| {
    vec![
        (
            Nuance::EvaluationRequest,
            re(r"(?i)(どう思う|評価|どうだった|どうかな|what do you think of|how (did|do) (i|you) do|\brate\b|evaluate)"),
        ),
        (
            Nuance::ExplanationRequest,
            re(r"(?i)(なぜ|どうして|説明|教えて|\bwhy\b|explain|how does)"),
        ),
        (
            Nuance::PreferenceRequest,
            re(r"(?i)(好き|嫌い|好み|prefer|favou?rite|do you like)"),
        ),
        (
            Nuance::MetaQuestion,
            re(r"(?i)(本当は|意識|存在|心がある|really|conscious|exist|aware)"),
        ),
        (
            Nuance::BoundaryCheck,
            re(r"(?i)(できる|してもいい|大丈夫|can you|are you allowed|is it ok|may i)"),
        ),
    ]
});

static PLURAL_SELF: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (re(r"私たち|私達|我々"), "私"),
        (re(r"僕たち|僕達|僕ら"), "僕"),
        (re(r"\bWe are\b"), "I am"),
        (re(r"\bwe are\b"), "I am"),
        (re(r"\bWe're\b"), "I'm"),
        (re(r"\bwe're\b"), "I'm"),
        (re(r"\bOur\b"), "My"),
        (re(r"\bour\b"), "my"),
    ]
});

/// Lead-ins are only stripped at the start of the text or of a sentence.
static GENERIC_LEAD_IN: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(^\s*|[。．.!?！？]\s*)(一般的に(は)?、?|AIとしては、?|AIとして、|as an ai( language model)?,?\s*|generally speaking,?\s*)")
});

static ASKS_USER_VIEW: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(あなたはどう|あなた自身は|どう感じ|what do you think|how do you feel)")
});

/// Appended to evaluation replies that do not already ask for the user's view.
pub const PERSPECTIVE_INVITATION: &str = "あなた自身はどう感じていますか？";

/// Minimum confidence for [`apply_self_constraints`] to act.
pub const CONSTRAINT_CONFIDENCE: f64 = 0.4;

fn detect_referent(text: &str, previous: Option<&SelfReferentInfo>) -> Referent {
    let inclusive = INCLUSIVE.is_match(text);
    if AI_DIRECTED.is_match(text) {
        return if inclusive { Referent::Mixed } else { Referent::Ai };
    }
    if USER_SELF.is_match(text) || inclusive {
        return if inclusive { Referent::Mixed } else { Referent::User };
    }
    if THIRD_PARTY.is_match(text) {
        return Referent::Third;
    }
    if previous.is_some_and(|p| p.referent == Referent::Ai) && CONTINUATION.is_match(text) {
        return Referent::Ai;
    }
    Referent::Unknown
}

fn detect_target(text: &str) -> SelfTarget {
    TARGETS
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(target, _)| *target)
        .unwrap_or(SelfTarget::Unknown)
}

fn detect_nuance(text: &str) -> Nuance {
    NUANCES
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(nuance, _)| *nuance)
        .unwrap_or(Nuance::None)
}

/// Confidence from how many stages resolved. Monotonic in resolved stages.
pub fn score_confidence(referent: Referent, target: SelfTarget, nuance: Nuance) -> f64 {
    let mut confidence: f64 = 0.5;
    confidence += match referent {
        Referent::Ai | Referent::User | Referent::Third => 0.2,
        Referent::Mixed => 0.1,
        Referent::Unknown => 0.0,
    };
    if target != SelfTarget::Unknown {
        confidence += 0.1;
    }
    if nuance != Nuance::None {
        confidence += 0.1;
    }
    confidence.clamp(0.0, 1.0)
}

pub fn analyze_self_reference(text: &str, previous: Option<&SelfReferentInfo>) -> SelfReferentInfo {
    let referent = detect_referent(text, previous);
    let (self_target, nuance) = if matches!(referent, Referent::Ai | Referent::Mixed) {
        (detect_target(text), detect_nuance(text))
    } else {
        (SelfTarget::Unknown, Nuance::None)
    };

    SelfReferentInfo {
        referent,
        self_target,
        nuance,
        confidence: score_confidence(referent, self_target, nuance),
        previous: previous.map(|p| Box::new(p.detached())),
    }
}

/// Rewrite a reply for a turn about the persona itself.
///
/// No-op unless the referent is `ai`/`mixed` with enough confidence.
pub fn apply_self_constraints(output: &str, info: &SelfReferentInfo) -> String {
    if !info.is_about_ai() || info.confidence < CONSTRAINT_CONFIDENCE {
        return output.to_string();
    }

    let mut text = output.to_string();
    for (pattern, singular) in PLURAL_SELF.iter() {
        text = pattern.replace_all(&text, *singular).into_owned();
    }
    text = GENERIC_LEAD_IN.replace_all(&text, "${1}").trim().to_string();

    if info.nuance == Nuance::EvaluationRequest && !ASKS_USER_VIEW.is_match(&text) {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(PERSPECTIVE_INVITATION);
    }
    text
}
