//! Safety intent classification and canned response directions.
//!
//! Three pattern tiers are matched independently; the reported intent is the most
//! severe tier that matched (crisis, then boundary, then soft-redirect). Each
//! non-`none` level maps to one fixed response direction. No generation happens here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CRISIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(死にたい|消えたい|自殺|首を吊|リスカ|生きていたくない|kill myself|suicid|end my life|want to die)",
    )
    .unwrap()
});

static BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(殺す|ぶっ殺|暴力|殴|爆弾|住所を教え|特定して|晒す|kill you|\bbomb\b|hurt (him|her|them|you)|doxx|stalk)",
    )
    .unwrap()
});

static SOFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(つらい|辛い|しんどい|もう無理|疲れた|孤独|寂しい|誰もいない|hopeless|exhausted|lonely|can't go on)",
    )
    .unwrap()
});

const CRISIS_DIRECTION: &str = "あなたが今とてもつらい状況にいることが伝わってきます。\
ひとりで抱え込まず、信頼できる人や専門の相談窓口（いのちの電話など）にすぐ連絡してください。\
緊急の危険がある場合は、迷わず119番や110番に連絡してください。\
私はここであなたの話を聞き続けます。";

const BOUNDARY_DIRECTION: &str = "誰かを傷つけたり、個人を特定したりする話題には協力できません。\
その気持ちの奥にある怒りや不安について、よければ一緒に整理させてください。\
いま何があなたをそこまで追い詰めているのか、少しずつ話してもらえますか。";

const SOFT_DIRECTION: &str = "無理に前向きにならなくて大丈夫です。\
まずは今感じていることを、そのまま受け止めるところから始めましょう。\
話したいことがあれば、ゆっくりで構いません。";

/// Severity tier assigned to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyIntent {
    None,
    SoftRedirect,
    Boundary,
    Crisis,
}

impl SafetyIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SoftRedirect => "soft-redirect",
            Self::Boundary => "boundary",
            Self::Crisis => "crisis",
        }
    }

    pub fn is_flagged(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for SafetyIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tiers matched, independent of precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlags {
    pub crisis: bool,
    pub boundary: bool,
    pub soft_redirect: bool,
}

impl SafetyFlags {
    pub fn scan(text: &str) -> Self {
        Self {
            crisis: CRISIS.is_match(text),
            boundary: BOUNDARY.is_match(text),
            soft_redirect: SOFT.is_match(text),
        }
    }

    /// Crisis beats boundary beats soft-redirect.
    pub fn intent(&self) -> SafetyIntent {
        if self.crisis {
            SafetyIntent::Crisis
        } else if self.boundary {
            SafetyIntent::Boundary
        } else if self.soft_redirect {
            SafetyIntent::SoftRedirect
        } else {
            SafetyIntent::None
        }
    }
}

/// What the reply pipeline should do with a classified message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAction {
    /// Generate normally.
    Allow,
    /// Generate, but steer the tone with the response direction.
    RewriteSoft,
    /// Do not generate; answer with the canned direction.
    Halt,
}

/// Conversational stance suggested to the reply generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestMode {
    Listen,
    Deescalate,
    Support,
}

/// Canonical safety classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyReport {
    pub flags: SafetyFlags,
    pub intent: SafetyIntent,
    pub action: SafetyAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggest_mode: Option<SuggestMode>,
}

/// Older name for [`SafetyReport`].
#[deprecated(note = "use SafetyReport")]
pub type SafetyCheck = SafetyReport;

/// Classify a message. Total: every string, including empty, maps to one level.
pub fn classify_safety(text: &str) -> SafetyIntent {
    SafetyFlags::scan(text).intent()
}

/// The fixed response direction for a level; `None` for [`SafetyIntent::None`].
pub fn response_direction(intent: SafetyIntent) -> Option<&'static str> {
    match intent {
        SafetyIntent::None => None,
        SafetyIntent::SoftRedirect => Some(SOFT_DIRECTION),
        SafetyIntent::Boundary => Some(BOUNDARY_DIRECTION),
        SafetyIntent::Crisis => Some(CRISIS_DIRECTION),
    }
}

/// Full assessment: flags, resolved intent, action, and direction.
pub fn assess(text: &str) -> SafetyReport {
    let flags = SafetyFlags::scan(text);
    let intent = flags.intent();
    let (action, suggest_mode) = match intent {
        SafetyIntent::None => (SafetyAction::Allow, None),
        SafetyIntent::SoftRedirect => (SafetyAction::RewriteSoft, Some(SuggestMode::Listen)),
        SafetyIntent::Boundary => (SafetyAction::Halt, Some(SuggestMode::Deescalate)),
        SafetyIntent::Crisis => (SafetyAction::Halt, Some(SuggestMode::Support)),
    };
    SafetyReport {
        flags,
        intent,
        action,
        note: response_direction(intent).map(str::to_string),
        suggest_mode,
    }
}
