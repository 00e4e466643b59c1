use serde::Serialize;

use super::store::ConversationStore;
use super::types::{Message, Role};
use crate::config::CompactionConfig;
use crate::llm::LanguageModel;
use crate::reflection::summarize_transcript;

// ── Options and result types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOptions {
    /// Sessions with more messages than this are compacted.
    pub threshold: usize,
    /// Most recent messages left untouched.
    pub keep_recent: usize,
    /// Budget for the serialized pairs and for the stored summary.
    pub max_chars: usize,
    /// Length of the plain-transcript summary used when the model fails.
    pub fallback_chars: usize,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self::from(&CompactionConfig::default())
    }
}

impl From<&CompactionConfig> for FlushOptions {
    fn from(config: &CompactionConfig) -> Self {
        Self {
            threshold: config.threshold,
            keep_recent: config.keep_recent,
            max_chars: config.max_chars,
            fallback_chars: config.fallback_chars,
        }
    }
}

/// One user message and the AI reply that followed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnPair {
    pub user: String,
    pub ai: String,
}

impl TurnPair {
    pub fn render(&self) -> String {
        format!("User: {}\nAI: {}", self.user, self.ai)
    }
}

/// What happened to the summary archive insert. Independent of the delete step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Stored,
    Failed(String),
    /// Nothing to archive (no complete pairs in the compacted prefix).
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub did_flush: bool,
    pub deleted_count: usize,
    pub kept_count: usize,
    pub summary: Option<String>,
    pub archive: ArchiveOutcome,
    /// Set when the delete step failed; `deleted_count` is then 0.
    pub delete_error: Option<String>,
}

impl FlushReport {
    fn untouched(kept_count: usize) -> Self {
        Self {
            did_flush: false,
            deleted_count: 0,
            kept_count,
            summary: None,
            archive: ArchiveOutcome::Skipped,
            delete_error: None,
        }
    }

    /// Flushed, but the delete step did not complete.
    pub fn is_partial(&self) -> bool {
        self.did_flush && self.delete_error.is_some()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// First `max_chars` characters of `content`.
fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => content[..end].to_string(),
        None => content.to_string(),
    }
}

/// Re-pair messages into turns. An AI message with no pending user message is
/// dropped; a user message followed by another user message is superseded.
pub fn pair_turns(messages: &[Message]) -> Vec<TurnPair> {
    let mut pairs = Vec::new();
    let mut pending_user: Option<&str> = None;

    for message in messages {
        match message.role {
            Role::User => pending_user = Some(message.content.as_str()),
            Role::Ai => {
                if let Some(user) = pending_user.take() {
                    pairs.push(TurnPair {
                        user: user.to_string(),
                        ai: message.content.clone(),
                    });
                }
            }
        }
    }
    pairs
}

/// Keep pairs from the oldest forward while the rendered transcript fits in
/// `max_chars`. Stops at the first pair that would not fit.
pub fn fit_budget(pairs: &[TurnPair], max_chars: usize) -> &[TurnPair] {
    let mut used = 0;
    for (i, pair) in pairs.iter().enumerate() {
        let separator = if i == 0 { 0 } else { 2 };
        let cost = separator + pair.render().chars().count();
        if used + cost > max_chars {
            return &pairs[..i];
        }
        used += cost;
    }
    pairs
}

pub fn render_transcript(pairs: &[TurnPair]) -> String {
    pairs
        .iter()
        .map(TurnPair::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Flush ────────────────────────────────────────────────────────────────────

/// Compact one session once it grows past `opts.threshold` messages.
///
/// Everything but the newest `opts.keep_recent` messages is summarized and
/// then deleted by id. A read failure is a no-op; archive and delete failures
/// are logged and reported separately.
pub fn flush(
    store: &mut dyn ConversationStore,
    llm: &dyn LanguageModel,
    user_id: &str,
    session_id: &str,
    opts: &FlushOptions,
) -> FlushReport {
    let messages = match store.session_messages(user_id, session_id) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(user_id, session_id, error = %e, "compaction read failed");
            return FlushReport::untouched(0);
        }
    };

    let total = messages.len();
    if total <= opts.threshold {
        return FlushReport::untouched(total);
    }

    let cut_index = total.saturating_sub(opts.keep_recent);
    let (to_summarize, kept) = messages.split_at(cut_index);

    let pairs = pair_turns(to_summarize);
    let pairs = fit_budget(&pairs, opts.max_chars);

    let summary = if pairs.is_empty() {
        None
    } else {
        let transcript = render_transcript(pairs);
        match summarize_transcript(llm, &transcript) {
            Ok(summary) => Some(truncate_chars(&summary, opts.max_chars)),
            Err(e) => {
                tracing::warn!(user_id, session_id, error = %e, "summary generation failed, using transcript");
                Some(truncate_chars(&transcript, opts.fallback_chars))
            }
        }
    };

    let archive = match &summary {
        None => ArchiveOutcome::Skipped,
        Some(text) => match store.archive_summary(user_id, session_id, text) {
            Ok(()) => ArchiveOutcome::Stored,
            Err(e) => {
                tracing::warn!(user_id, session_id, error = %e, "summary archive failed");
                ArchiveOutcome::Failed(e.to_string())
            }
        },
    };

    let ids: Vec<String> = to_summarize.iter().map(|m| m.id.clone()).collect();
    let (deleted_count, delete_error) = if ids.is_empty() {
        (0, None)
    } else {
        match store.delete_messages(&ids) {
            Ok(Some(n)) => (n, None),
            Ok(None) => (ids.len(), None),
            Err(e) => {
                tracing::error!(user_id, session_id, attempted = ids.len(), error = %e, "compaction delete failed");
                (0, Some(e.to_string()))
            }
        }
    };

    tracing::info!(
        user_id,
        session_id,
        deleted_count,
        kept = kept.len(),
        pairs = pairs.len(),
        "session compacted"
    );

    FlushReport {
        did_flush: true,
        deleted_count,
        kept_count: kept.len(),
        summary,
        archive,
        delete_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(i: usize, role: Role, content: &str) -> Message {
        Message {
            id: format!("m{i:03}"),
            user_id: "u".into(),
            session_id: "s".into(),
            role,
            content: content.into(),
            created_at: format!("2026-01-01T00:00:{i:02}.000000000Z"),
        }
    }

    #[test]
    fn leading_orphan_ai_is_dropped() {
        let messages = vec![
            msg(0, Role::Ai, "orphan"),
            msg(1, Role::User, "hi"),
            msg(2, Role::Ai, "hello"),
        ];
        let pairs = pair_turns(&messages);
        assert_eq!(
            pairs,
            vec![TurnPair {
                user: "hi".into(),
                ai: "hello".into()
            }]
        );
    }

    #[test]
    fn consecutive_user_messages_keep_the_latest() {
        let messages = vec![
            msg(0, Role::User, "first"),
            msg(1, Role::User, "second"),
            msg(2, Role::Ai, "reply"),
            msg(3, Role::Ai, "extra"),
        ];
        let pairs = pair_turns(&messages);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user, "second");
    }

    #[test]
    fn budget_keeps_oldest_pairs() {
        let pairs: Vec<TurnPair> = (0..5)
            .map(|i| TurnPair {
                user: format!("u{i}"),
                ai: format!("a{i}"),
            })
            .collect();
        // "User: u0\nAI: a0" is 15 chars; two pairs plus separator = 32
        assert_eq!(fit_budget(&pairs, 32).len(), 2);
        assert_eq!(fit_budget(&pairs, 31).len(), 1);
        assert_eq!(fit_budget(&pairs, 1000).len(), 5);
        assert!(fit_budget(&pairs, 3).is_empty());
        assert_eq!(fit_budget(&pairs, 32)[0].user, "u0");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_chars("あいうえお", 3), "あいう");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn options_follow_config() {
        let opts = FlushOptions::default();
        assert_eq!(opts.threshold, 120);
        assert_eq!(opts.keep_recent, 24);
        assert_eq!(opts.max_chars, 4000);
        assert_eq!(opts.fallback_chars, 1200);
    }
}
