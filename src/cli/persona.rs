use anyhow::Result;

use sigmaris::config::SigmarisConfig;
use sigmaris::persona::stats::persona_stats;

/// Display one user's persona state and counters.
pub fn persona(config: &SigmarisConfig, user_id: &str, json: bool) -> Result<()> {
    let conn = sigmaris::db::open_database(config.resolved_db_path())?;
    let stats = persona_stats(&conn, user_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Persona: {user_id}");
    println!("{}", "=".repeat(40));
    match stats.traits {
        Some(traits) => {
            println!("  Calm:                {:.3}", traits.calm);
            println!("  Empathy:             {:.3}", traits.empathy);
            println!("  Curiosity:           {:.3}", traits.curiosity);
            if let Some(growth) = stats.growth {
                println!("  Growth:              {growth:.3}");
            }
        }
        None => println!("  (no persona yet, neutral defaults apply)"),
    }
    println!();

    println!("Messages:              {}", stats.total_messages);
    for role in ["user", "ai"] {
        let count = stats.by_role.get(role).copied().unwrap_or(0);
        println!("  {:<12} {}", role, count);
    }
    println!("Sessions:              {}", stats.sessions);
    println!("Growth log entries:    {}", stats.growth_log_entries);
    println!("Archived summaries:    {}", stats.archived_summaries);
    println!("Flagged safety events: {}", stats.flagged_safety_events);

    if let Some(ref first) = stats.first_message {
        println!("First message:         {first}");
    }
    if let Some(ref last) = stats.last_message {
        println!("Last message:          {last}");
    }

    Ok(())
}
