//! CLI `flush` command: compact one session on demand.

use anyhow::Result;
use std::sync::{Arc, Mutex};

use sigmaris::config::SigmarisConfig;
use sigmaris::persona::compaction::{self, ArchiveOutcome, FlushOptions};
use sigmaris::persona::store::SharedConnection;

/// Run compaction for `(user_id, session_id)` with config defaults, overridden
/// by any explicit options.
///
/// Async because the summarizer call has to run on the blocking pool.
pub async fn flush(
    config: &SigmarisConfig,
    user_id: &str,
    session_id: &str,
    threshold: Option<usize>,
    keep_recent: Option<usize>,
    json: bool,
) -> Result<()> {
    let conn = sigmaris::db::open_database(config.resolved_db_path())?;
    let llm = sigmaris::llm::create_model(&config.llm)?;

    let mut opts = FlushOptions::from(&config.compaction);
    if let Some(threshold) = threshold {
        opts.threshold = threshold;
    }
    if let Some(keep_recent) = keep_recent {
        opts.keep_recent = keep_recent;
    }

    let mut store = SharedConnection(Arc::new(Mutex::new(conn)));
    let (uid, sid) = (user_id.to_string(), session_id.to_string());
    let report = tokio::task::spawn_blocking(move || {
        compaction::flush(&mut store, llm.as_ref(), &uid, &sid, &opts)
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !report.did_flush {
        println!(
            "Session has {} messages (threshold {}); nothing to compact.",
            report.kept_count, opts.threshold
        );
        return Ok(());
    }

    println!("Compacted session {session_id} for {user_id}:");
    println!("  Deleted:   {}", report.deleted_count);
    println!("  Kept:      {}", report.kept_count);
    match &report.archive {
        ArchiveOutcome::Stored => println!("  Summary:   archived"),
        ArchiveOutcome::Skipped => println!("  Summary:   none (no complete turns)"),
        ArchiveOutcome::Failed(e) => println!("  Summary:   NOT archived ({e})"),
    }
    if let Some(ref e) = report.delete_error {
        println!("  WARNING: delete failed, messages were left in place: {e}");
    }
    if let Some(ref summary) = report.summary {
        println!();
        println!("{summary}");
    }

    Ok(())
}
