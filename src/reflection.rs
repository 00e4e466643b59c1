//! Reflection and meta-reflection.
//!
//! [`reflect`] asks the language model for a short first-person reflection on a
//! turn. [`analyze`] condenses a reflection plus the trait state into a
//! [`MetaReport`]; it owns the parsing contract and never fails: unparseable
//! output falls back to local rules, a failed model call yields [`error_report`].
//! [`summarize_transcript`] is the seam compaction uses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::llm::{LanguageModel, LlmError};
use crate::persona::types::{sanitize_unit, MetaReport, TraitVector};

pub const ERROR_SUMMARY: &str = "メタ分析中にエラーが発生しました。";
pub const ERROR_FOCUS: &str = "Stability Maintenance";
pub const DEFAULT_FOCUS: &str = "General Reflection";

/// Fallback summaries keep this many characters before the ellipsis.
pub const SUMMARY_CHARS: usize = 120;

const REFLECT_SYSTEM: &str = "あなたはAIコンパニオン「シグマリス」の内省モジュールです。\
直前の会話を振り返り、自分の応答の傾向や感じたことを一人称で2〜3文にまとめてください。";

const META_SYSTEM: &str = "You are the meta-reflection module of an AI companion. \
Read the reflection and trait state and output ONLY JSON with the keys \
\"summary\" (string), \"growthAdjustment\" (number 0..1), \"nextFocus\" (short label) \
and \"reasoning\" (string).";

const SUMMARY_SYSTEM: &str = "以下の会話ログを、後から文脈を思い出せるように日本語で簡潔に要約してください。\
話題、ユーザーの気持ち、約束や決定事項を優先してください。";

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

struct FocusRule {
    pattern: Regex,
    label: &'static str,
}

static FOCUS_RULES: Lazy<Vec<FocusRule>> = Lazy::new(|| {
    let rule = |pattern: &str, label| FocusRule {
        pattern: Regex::new(pattern).unwrap(),
        label,
    };
    vec![
        rule(r"(?i)(感情|気持ち|emotion|feeling)", "Emotion Regulation"),
        rule(r"(?i)(責任|判断|倫理|responsib|judg|ethic)", "Ethical Judgement"),
        rule(r"(?i)(学習|学び|成長|learn|grow)", "Continuous Growth"),
        rule(r"(?i)(関係|つながり|対話|relationship|communicat)", "Empathy & Communication"),
    ]
});

// ── Local fallback rules ─────────────────────────────────────────────────────

/// First [`SUMMARY_CHARS`] characters, with an ellipsis when truncated.
pub fn fallback_summarize(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(SUMMARY_CHARS).collect();
    out.push('…');
    out
}

/// Distance of the trait average from neutral, shifted up by one half.
pub fn estimate_growth(traits: &TraitVector) -> f64 {
    (0.5 + (traits.average() - 0.5).abs()).min(1.0)
}

/// Keyword table lookup; the first matching rule wins.
pub fn define_next_focus(text: &str) -> &'static str {
    FOCUS_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(text))
        .map(|rule| rule.label)
        .unwrap_or(DEFAULT_FOCUS)
}

pub fn fallback_report(reflection: &str, traits: &TraitVector) -> MetaReport {
    MetaReport {
        summary: fallback_summarize(reflection),
        growth_adjustment: estimate_growth(traits),
        next_focus: define_next_focus(reflection).to_string(),
        reasoning: None,
    }
}

pub fn error_report() -> MetaReport {
    MetaReport {
        summary: ERROR_SUMMARY.to_string(),
        growth_adjustment: 0.0,
        next_focus: ERROR_FOCUS.to_string(),
        reasoning: None,
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// The first fenced block's body, else the whole response.
pub fn extract_json_payload(raw: &str) -> &str {
    FENCED
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, alias = "growth_adjustment")]
    growth_adjustment: Option<serde_json::Value>,
    #[serde(default, alias = "next_focus")]
    next_focus: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse a model response. Missing fields are filled from the local rules;
/// `None` when the payload is not a JSON object at all.
pub fn parse_meta_response(raw: &str, reflection: &str, traits: &TraitVector) -> Option<MetaReport> {
    let parsed: RawMeta = serde_json::from_str(extract_json_payload(raw)).ok()?;
    let fallback = fallback_report(reflection, traits);

    let summary = parsed
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(fallback.summary);
    let growth_adjustment = parsed
        .growth_adjustment
        .as_ref()
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .map(sanitize_unit)
        .unwrap_or(fallback.growth_adjustment);
    let next_focus = parsed
        .next_focus
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(fallback.next_focus);

    Some(MetaReport {
        summary,
        growth_adjustment,
        next_focus,
        reasoning: parsed.reasoning.filter(|s| !s.trim().is_empty()),
    })
}

// ── Model calls ──────────────────────────────────────────────────────────────

fn traits_line(traits: &TraitVector) -> String {
    format!(
        "calm={:.3}, empathy={:.3}, curiosity={:.3}",
        traits.calm, traits.empathy, traits.curiosity
    )
}

pub fn build_meta_prompt(reflection: &str, traits: &TraitVector, prior_summary: Option<&str>) -> String {
    let mut prompt = format!("# Reflection\n{reflection}\n\n# Traits\n{}\n", traits_line(traits));
    if let Some(prior) = prior_summary.filter(|p| !p.trim().is_empty()) {
        prompt.push_str(&format!("\n# Previous summary\n{prior}\n"));
    }
    prompt
}

/// Condense a reflection into a [`MetaReport`]. Never fails.
pub fn analyze(
    llm: &dyn LanguageModel,
    reflection: &str,
    traits: &TraitVector,
    prior_summary: Option<&str>,
) -> MetaReport {
    let prompt = build_meta_prompt(reflection, traits, prior_summary);
    match llm.generate(META_SYSTEM, &prompt) {
        Ok(raw) => match parse_meta_response(&raw, reflection, traits) {
            Some(report) => report,
            None => {
                tracing::warn!(model = llm.model_name(), "meta response was not JSON, using local rules");
                fallback_report(reflection, traits)
            }
        },
        Err(e) => {
            tracing::warn!(model = llm.model_name(), error = %e, "meta analysis failed");
            error_report()
        }
    }
}

/// First-person reflection on one exchange.
pub fn reflect(
    llm: &dyn LanguageModel,
    user_message: &str,
    reply: &str,
    traits: &TraitVector,
) -> Result<String, LlmError> {
    let prompt = format!(
        "ユーザー: {user_message}\nシグマリス: {reply}\n現在の特性: {}",
        traits_line(traits)
    );
    let text = llm.generate(REFLECT_SYSTEM, &prompt)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// Summarize a serialized conversation transcript.
pub fn summarize_transcript(llm: &dyn LanguageModel, transcript: &str) -> Result<String, LlmError> {
    let summary = llm.generate(SUMMARY_SYSTEM, transcript)?;
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(summary.to_string())
}
