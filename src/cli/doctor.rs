//! CLI `doctor` command: database diagnostics and a health report.

use anyhow::{Context, Result};

use sigmaris::config::SigmarisConfig;
use sigmaris::db;

pub fn doctor(config: &SigmarisConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `sigmaris turn` once to initialize it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Sigmaris Health Report");
    println!("======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Language model:");
    println!("  Provider:        {}", config.llm.provider);
    println!("  Model:           {}", config.llm.model);
    if config.llm.provider == "openai" {
        let key_set = std::env::var(&config.llm.api_key_env)
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false);
        if key_set {
            println!("  API key:         OK (${})", config.llm.api_key_env);
        } else {
            println!("  WARNING: ${} is not set; replies will use fallbacks.", config.llm.api_key_env);
        }
    }
    println!();
    println!("Row counts:");
    println!("  Personas:        {}", report.persona_count);
    println!("  Messages:        {}", report.message_count);
    println!("  Growth log:      {}", report.growth_log_count);
    println!("  Summaries:       {}", report.summary_count);
    println!("  Safety log:      {}", report.safety_log_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore ~/.sigmaris/persona.db from a backup, or move it aside");
        println!("to start over with neutral personas.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
