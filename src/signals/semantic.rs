//! Concept extraction over a small fixed lexicon.
//!
//! Text is split into maximal single-script runs (Han, Hiragana, Katakana, ASCII
//! alphanumerics). Each run is looked up in [`LEXICON`]; hits become [`Concept`]s,
//! deduplicated by `(kind, sorted tags)` so synonyms across scripts collapse to one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptKind {
    Abstract,
    Concrete,
    Meta,
    Action,
    Feeling,
}

/// Trait axis a concept leans toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitHint {
    Calm,
    Empathy,
    Curiosity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub lemma: String,
    pub kind: ConceptKind,
    pub tags: Vec<String>,
    pub emotion_hints: Vec<TraitHint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticFrame {
    pub concepts: Vec<Concept>,
    /// In `[-1, 1]`.
    pub sentiment: f64,
    /// Share of abstract and meta concepts, `0` when there are none.
    pub abstract_ratio: f64,
    pub intents: Vec<String>,
    pub has_self_reference: bool,
}

struct LexEntry {
    surface: &'static str,
    lemma: &'static str,
    kind: ConceptKind,
    tags: &'static [&'static str],
    hints: &'static [TraitHint],
}

use ConceptKind::{Abstract, Action, Concrete, Feeling, Meta};
use TraitHint::{Calm, Curiosity, Empathy};

const fn lex(
    surface: &'static str,
    lemma: &'static str,
    kind: ConceptKind,
    tags: &'static [&'static str],
    hints: &'static [TraitHint],
) -> LexEntry {
    LexEntry {
        surface,
        lemma,
        kind,
        tags,
        hints,
    }
}

const LEXICON: &[LexEntry] = &[
    lex("自由", "freedom", Abstract, &["freedom", "value"], &[Curiosity]),
    lex("freedom", "freedom", Abstract, &["value", "freedom"], &[Curiosity]),
    lex("意味", "meaning", Abstract, &["meaning"], &[Curiosity]),
    lex("meaning", "meaning", Abstract, &["meaning"], &[Curiosity]),
    lex("存在", "existence", Abstract, &["existence"], &[Curiosity, Calm]),
    lex("未来", "future", Abstract, &["time", "future"], &[Curiosity]),
    lex("future", "future", Abstract, &["future", "time"], &[Curiosity]),
    lex("心", "mind", Abstract, &["mind", "self"], &[Empathy]),
    lex("mind", "mind", Abstract, &["self", "mind"], &[Empathy]),
    lex("記憶", "memory", Meta, &["memory", "self"], &[Curiosity]),
    lex("memory", "memory", Meta, &["self", "memory"], &[Curiosity]),
    lex("人格", "persona", Meta, &["persona", "self"], &[Calm]),
    lex("persona", "persona", Meta, &["self", "persona"], &[Calm]),
    lex("ai", "ai", Meta, &["ai", "system"], &[Curiosity]),
    lex("システム", "system", Meta, &["system"], &[Calm]),
    lex("自分", "self", Meta, &["self"], &[Calm]),
    lex("愛", "love", Feeling, &["love"], &[Empathy]),
    lex("love", "love", Feeling, &["love"], &[Empathy]),
    lex("優", "kindness", Feeling, &["kindness"], &[Empathy]),
    lex("kind", "kindness", Feeling, &["kindness"], &[Empathy]),
    lex("不安", "anxiety", Feeling, &["anxiety"], &[Calm]),
    lex("anxiety", "anxiety", Feeling, &["anxiety"], &[Calm]),
    lex("安心", "relief", Feeling, &["relief"], &[Calm]),
    lex("悲", "sadness", Feeling, &["sadness"], &[Empathy]),
    lex("sad", "sadness", Feeling, &["sadness"], &[Empathy]),
    lex("怒", "anger", Feeling, &["anger"], &[Calm]),
    lex("考", "think", Action, &["thinking"], &[Curiosity]),
    lex("think", "think", Action, &["thinking"], &[Curiosity]),
    lex("学", "learn", Action, &["learning"], &[Curiosity]),
    lex("learn", "learn", Action, &["learning"], &[Curiosity]),
    lex("話", "talk", Action, &["talk"], &[Empathy]),
    lex("talk", "talk", Action, &["talk"], &[Empathy]),
    lex("猫", "cat", Concrete, &["animal"], &[Empathy]),
    lex("cat", "cat", Concrete, &["animal"], &[Empathy]),
    lex("空", "sky", Concrete, &["nature"], &[Calm]),
    lex("sky", "sky", Concrete, &["nature"], &[Calm]),
    lex("雨", "rain", Concrete, &["weather"], &[Calm]),
    lex("rain", "rain", Concrete, &["weather"], &[Calm]),
    lex("本", "book", Concrete, &["object", "reading"], &[Curiosity]),
    lex("book", "book", Concrete, &["reading", "object"], &[Curiosity]),
];

static POSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(嬉し|楽し|好き|ありがと|良い|よかった|happy|glad|\blove\b|great|thank)").unwrap()
});

static NEGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(悲し|辛|つら|嫌|怖|不安|\bsad\b|angry|hate|afraid|tired)").unwrap()
});

static ASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\?|？|ですか|ますか|教えて|\bwhat\b|\bwhy\b|\bhow\b|can you)").unwrap()
});

static REFLECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(思う|考え|感じ|気がする|i think|i feel|i wonder)").unwrap()
});

static FIRST_PERSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(私|僕|俺|わたし|ぼく|自分|\bi\b|\bme\b|\bmy\b|\bmyself\b)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Han,
    Hiragana,
    Katakana,
    Ascii,
}

fn script_of(c: char) -> Option<Script> {
    match c {
        '\u{3040}'..='\u{309F}' => Some(Script::Hiragana),
        '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' => Some(Script::Katakana),
        '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}' | '々' => {
            Some(Script::Han)
        }
        c if c.is_ascii_alphanumeric() => Some(Script::Ascii),
        _ => None,
    }
}

/// Split into maximal same-script runs; ASCII runs are lowercased.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_script: Option<Script> = None;

    for c in text.chars() {
        let script = script_of(c);
        if script != current_script && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current_script = script;
        if let Some(script) = script {
            if script == Script::Ascii {
                current.push(c.to_ascii_lowercase());
            } else {
                current.push(c);
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub fn map_concepts(text: &str) -> SemanticFrame {
    let mut concepts: Vec<Concept> = Vec::new();
    let mut seen: HashSet<(ConceptKind, Vec<&'static str>)> = HashSet::new();

    for token in tokenize(text) {
        let Some(entry) = LEXICON.iter().find(|e| e.surface == token) else {
            continue;
        };
        let mut key_tags = entry.tags.to_vec();
        key_tags.sort_unstable();
        if !seen.insert((entry.kind, key_tags)) {
            continue;
        }
        concepts.push(Concept {
            lemma: entry.lemma.to_string(),
            kind: entry.kind,
            tags: entry.tags.iter().map(|t| t.to_string()).collect(),
            emotion_hints: entry.hints.to_vec(),
        });
    }

    let abstract_ratio = if concepts.is_empty() {
        0.0
    } else {
        let abstract_or_meta = concepts
            .iter()
            .filter(|c| matches!(c.kind, Abstract | Meta))
            .count();
        abstract_or_meta as f64 / concepts.len() as f64
    };

    let mut sentiment: f64 = 0.0;
    if POSITIVE.is_match(text) {
        sentiment += 0.5;
    }
    if NEGATIVE.is_match(text) {
        sentiment -= 0.5;
    }

    let mut intents = Vec::new();
    if ASK.is_match(text) {
        intents.push("ask".to_string());
    }
    if REFLECT.is_match(text) {
        intents.push("reflect".to_string());
    }
    if intents.is_empty() {
        intents.push("assert".to_string());
    }

    let has_self_reference = FIRST_PERSON.is_match(text)
        || concepts.iter().any(|c| c.tags.iter().any(|t| t == "self"));

    SemanticFrame {
        concepts,
        sentiment: sentiment.clamp(-1.0, 1.0),
        abstract_ratio,
        intents,
        has_self_reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_script_boundaries() {
        assert_eq!(
            tokenize("自由についてAIと話す"),
            vec!["自由", "について", "ai", "と", "話", "す"]
        );
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert!(tokenize("  、。!").is_empty());
    }

    #[test]
    fn katakana_run_is_one_token() {
        assert_eq!(tokenize("システムの話"), vec!["システム", "の", "話"]);
    }

    #[test]
    fn synonyms_across_scripts_deduplicate() {
        let frame = map_concepts("自由 and freedom");
        assert_eq!(frame.concepts.len(), 1);
        assert_eq!(frame.concepts[0].lemma, "freedom");
        assert_eq!(frame.concepts[0].emotion_hints, vec![TraitHint::Curiosity]);
    }

    #[test]
    fn abstract_ratio_counts_abstract_and_meta() {
        // 自由 (abstract), 記憶 (meta), 猫 (concrete), 話 (action)
        let frame = map_concepts("自由と記憶と猫の話");
        assert_eq!(frame.concepts.len(), 4);
        assert!((frame.abstract_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_text_has_defaults() {
        let frame = map_concepts("");
        assert!(frame.concepts.is_empty());
        assert_eq!(frame.abstract_ratio, 0.0);
        assert_eq!(frame.sentiment, 0.0);
        assert_eq!(frame.intents, vec!["assert"]);
        assert!(!frame.has_self_reference);
    }

    #[test]
    fn sentiment_classes_cancel() {
        assert_eq!(map_concepts("嬉しい").sentiment, 0.5);
        assert_eq!(map_concepts("悲しい").sentiment, -0.5);
        assert_eq!(map_concepts("嬉しいけど悲しい").sentiment, 0.0);
    }

    #[test]
    fn intents_detect_ask_and_reflect() {
        assert_eq!(map_concepts("なんでだと思う？").intents, vec!["ask", "reflect"]);
        assert_eq!(map_concepts("What is this").intents, vec!["ask"]);
    }

    #[test]
    fn self_reference_via_pronoun_or_tag() {
        assert!(map_concepts("私は元気").has_self_reference);
        assert!(map_concepts("the memory fades").has_self_reference);
        assert!(!map_concepts("the cat sleeps").has_self_reference);
    }
}
