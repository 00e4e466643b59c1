use anyhow::Result;
use std::sync::{Arc, Mutex};

use sigmaris::config::SigmarisConfig;
use sigmaris::turn::{TurnEngine, TurnRequest};

/// Run one chat turn and print the reply (or the whole outcome as JSON).
pub async fn turn(
    config: SigmarisConfig,
    user_id: &str,
    session_id: &str,
    message: &str,
    json: bool,
) -> Result<()> {
    let conn = sigmaris::db::open_database(config.resolved_db_path())?;
    let llm = sigmaris::llm::create_model(&config.llm)?;
    let engine = TurnEngine::new(Arc::new(Mutex::new(conn)), llm, Arc::new(config));

    let outcome = engine
        .handle(TurnRequest::new(user_id, session_id, message))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("{}", outcome.reply);
    eprintln!(
        "[calm {:.3} | empathy {:.3} | curiosity {:.3} | drift {:.4} | safety {}]",
        outcome.traits.calm,
        outcome.traits.empathy,
        outcome.traits.curiosity,
        outcome.drift,
        outcome.signals.safety.intent,
    );
    if let Some(ref report) = outcome.flush {
        if report.did_flush {
            eprintln!(
                "[compacted: {} deleted, {} kept]",
                report.deleted_count, report.kept_count
            );
        }
    }
    Ok(())
}
