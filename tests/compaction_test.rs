mod helpers;

use anyhow::{bail, Result};
use rusqlite::Connection;
use sigmaris::persona::compaction::{flush, ArchiveOutcome, FlushOptions};
use sigmaris::persona::store::ConversationStore;
use sigmaris::persona::types::{Message, Role};

use helpers::ScriptedModel;

fn opts(threshold: usize, keep_recent: usize) -> FlushOptions {
    FlushOptions {
        threshold,
        keep_recent,
        ..FlushOptions::default()
    }
}

/// Delegates to a real connection, failing one chosen step.
struct FaultyStore {
    conn: Connection,
    fail_read: bool,
    fail_archive: bool,
    fail_delete: bool,
}

impl FaultyStore {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            fail_read: false,
            fail_archive: false,
            fail_delete: false,
        }
    }
}

impl ConversationStore for FaultyStore {
    fn session_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<Message>> {
        if self.fail_read {
            bail!("read failed");
        }
        self.conn.session_messages(user_id, session_id)
    }

    fn archive_summary(&self, user_id: &str, session_id: &str, summary: &str) -> Result<()> {
        if self.fail_archive {
            bail!("archive failed");
        }
        self.conn.archive_summary(user_id, session_id, summary)
    }

    fn delete_messages(&mut self, ids: &[String]) -> Result<Option<usize>> {
        if self.fail_delete {
            bail!("delete failed");
        }
        self.conn.delete_messages(ids)
    }
}

/// Simulates a writer appending to the session right after the snapshot read.
struct InterleavedWriter {
    conn: Connection,
}

impl ConversationStore for InterleavedWriter {
    fn session_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<Message>> {
        let snapshot = self.conn.session_messages(user_id, session_id)?;
        helpers::insert_at(&self.conn, user_id, session_id, 10_000, Role::User, "割り込み");
        Ok(snapshot)
    }

    fn archive_summary(&self, user_id: &str, session_id: &str, summary: &str) -> Result<()> {
        self.conn.archive_summary(user_id, session_id, summary)
    }

    fn delete_messages(&mut self, ids: &[String]) -> Result<Option<usize>> {
        self.conn.delete_messages(ids)
    }
}

#[test]
fn long_session_keeps_the_newest_messages() {
    let mut conn = helpers::test_db();
    let ids = helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let model = ScriptedModel::fixed("これまでの会話の要約");

    let report = flush(&mut conn, &model, "u1", "s1", &opts(120, 24));

    assert!(report.did_flush);
    assert_eq!(report.deleted_count, 126);
    assert_eq!(report.kept_count, 24);
    assert_eq!(report.summary.as_deref(), Some("これまでの会話の要約"));
    assert_eq!(report.archive, ArchiveOutcome::Stored);
    assert!(report.delete_error.is_none());

    assert_eq!(helpers::remaining_ids(&conn, "u1", "s1"), ids[126..].to_vec());
    assert_eq!(helpers::count_rows(&conn, "session_summaries"), 1);
}

#[test]
fn other_sessions_are_untouched() {
    let mut conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let other = helpers::seed_pairs(&conn, "u1", "s2", 0, 75);
    let model = ScriptedModel::fixed("要約");

    flush(&mut conn, &model, "u1", "s1", &opts(120, 24));

    assert_eq!(helpers::remaining_ids(&conn, "u1", "s2"), other);
}

#[test]
fn at_or_below_threshold_is_a_noop() {
    let mut conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 60);
    let model = ScriptedModel::fixed("要約");

    for _ in 0..2 {
        let report = flush(&mut conn, &model, "u1", "s1", &opts(120, 24));
        assert!(!report.did_flush);
        assert_eq!(report.deleted_count, 0);
        assert_eq!(report.kept_count, 120);
        assert!(report.summary.is_none());
    }
    assert!(model.calls().is_empty());
    assert_eq!(helpers::count_rows(&conn, "messages"), 120);
}

#[test]
fn second_flush_after_compaction_does_nothing() {
    let mut conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let model = ScriptedModel::fixed("要約");

    assert!(flush(&mut conn, &model, "u1", "s1", &opts(120, 24)).did_flush);
    let again = flush(&mut conn, &model, "u1", "s1", &opts(120, 24));
    assert!(!again.did_flush);
    assert_eq!(again.kept_count, 24);
}

#[test]
fn orphan_ai_message_is_left_out_of_the_transcript() {
    let mut conn = helpers::test_db();
    helpers::insert_at(&conn, "u1", "s1", 0, Role::Ai, "宙に浮いた返事");
    helpers::seed_pairs(&conn, "u1", "s1", 1, 10);
    let model = ScriptedModel::fixed("要約");

    let report = flush(&mut conn, &model, "u1", "s1", &opts(10, 4));

    // The orphan is still deleted with the rest of the prefix.
    assert_eq!(report.deleted_count, 17);
    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    let transcript = &calls[0].1;
    assert!(!transcript.contains("宙に浮いた返事"));
    assert!(transcript.starts_with("User: 質問0\nAI: 答え0"));
}

#[test]
fn transcript_budget_keeps_the_oldest_pairs() {
    let mut conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 10);
    let model = ScriptedModel::fixed("要約");

    // "User: 質問0\nAI: 答え0" is 17 characters; two pairs need 36.
    let options = FlushOptions {
        max_chars: 36,
        ..opts(4, 2)
    };
    flush(&mut conn, &model, "u1", "s1", &options);

    let transcript = &model.calls()[0].1;
    assert_eq!(transcript, "User: 質問0\nAI: 答え0\n\nUser: 質問1\nAI: 答え1");
}

#[test]
fn model_failure_falls_back_to_the_raw_transcript() {
    let mut conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let model = ScriptedModel::failing();
    let options = FlushOptions {
        fallback_chars: 40,
        ..opts(120, 24)
    };

    let report = flush(&mut conn, &model, "u1", "s1", &options);

    let summary = report.summary.expect("fallback summary");
    assert!(summary.starts_with("User: 質問0"));
    assert_eq!(summary.chars().count(), 40);
    assert_eq!(report.archive, ArchiveOutcome::Stored);
    assert_eq!(report.deleted_count, 126);
}

#[test]
fn summary_is_capped_at_max_chars() {
    let mut conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 10);
    let model = ScriptedModel::fixed(&"長".repeat(500));
    let options = FlushOptions {
        max_chars: 100,
        ..opts(4, 2)
    };

    let report = flush(&mut conn, &model, "u1", "s1", &options);
    assert_eq!(report.summary.unwrap().chars().count(), 100);
}

#[test]
fn read_failure_reports_nothing_flushed() {
    let conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let mut store = FaultyStore {
        fail_read: true,
        ..FaultyStore::new(conn)
    };
    let model = ScriptedModel::fixed("要約");

    let report = flush(&mut store, &model, "u1", "s1", &opts(120, 24));

    assert!(!report.did_flush);
    assert_eq!(report.deleted_count, 0);
    assert!(model.calls().is_empty());
    assert_eq!(helpers::count_rows(&store.conn, "messages"), 150);
}

#[test]
fn delete_failure_is_reported_as_partial() {
    let conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let mut store = FaultyStore {
        fail_delete: true,
        ..FaultyStore::new(conn)
    };
    let model = ScriptedModel::fixed("要約");

    let report = flush(&mut store, &model, "u1", "s1", &opts(120, 24));

    assert!(report.did_flush);
    assert!(report.is_partial());
    assert_eq!(report.deleted_count, 0);
    assert_eq!(report.delete_error.as_deref(), Some("delete failed"));
    // The archive insert is independent of the delete step.
    assert_eq!(report.archive, ArchiveOutcome::Stored);
    assert_eq!(helpers::count_rows(&store.conn, "messages"), 150);
}

#[test]
fn archive_failure_does_not_block_deletion() {
    let conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let mut store = FaultyStore {
        fail_archive: true,
        ..FaultyStore::new(conn)
    };
    let model = ScriptedModel::fixed("要約");

    let report = flush(&mut store, &model, "u1", "s1", &opts(120, 24));

    assert_eq!(report.archive, ArchiveOutcome::Failed("archive failed".into()));
    assert_eq!(report.deleted_count, 126);
    assert!(!report.is_partial());
    assert_eq!(helpers::count_rows(&store.conn, "session_summaries"), 0);
}

#[test]
fn prefix_without_pairs_is_deleted_without_a_summary() {
    let mut conn = helpers::test_db();
    for pos in 0..6 {
        helpers::insert_at(&conn, "u1", "s1", pos, Role::Ai, "独り言");
    }
    let model = ScriptedModel::fixed("要約");

    let report = flush(&mut conn, &model, "u1", "s1", &opts(4, 2));

    assert!(report.did_flush);
    assert!(report.summary.is_none());
    assert_eq!(report.archive, ArchiveOutcome::Skipped);
    assert_eq!(report.deleted_count, 4);
    assert!(model.calls().is_empty());
}

#[test]
fn messages_written_after_the_read_survive() {
    let conn = helpers::test_db();
    helpers::seed_pairs(&conn, "u1", "s1", 0, 75);
    let mut store = InterleavedWriter { conn };
    let model = ScriptedModel::fixed("要約");

    let report = flush(&mut store, &model, "u1", "s1", &opts(120, 24));

    assert_eq!(report.deleted_count, 126);
    let remaining = helpers::remaining_ids(&store.conn, "u1", "s1");
    assert_eq!(remaining.len(), 25);
    assert_eq!(remaining.last().map(String::as_str), Some("s1-10000"));
}
