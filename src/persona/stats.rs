use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::store::load_persona;
use super::types::TraitVector;

/// Per-user persona statistics.
#[derive(Debug, Serialize)]
pub struct PersonaStats {
    pub user_id: String,
    /// `None` when the user has no persona row yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traits: Option<TraitVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth: Option<f64>,
    pub total_messages: u64,
    pub by_role: HashMap<String, u64>,
    pub sessions: u64,
    pub growth_log_entries: u64,
    pub archived_summaries: u64,
    /// Safety audit rows with a non-`none` level.
    pub flagged_safety_events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

pub fn persona_stats(conn: &Connection, user_id: &str) -> Result<PersonaStats> {
    let persona = load_persona(conn, user_id)?;
    let by_role = count_by_role(conn, user_id)?;
    let total_messages = by_role.values().sum();
    let (first_message, last_message) = message_time_range(conn, user_id)?;

    Ok(PersonaStats {
        user_id: user_id.to_string(),
        traits: persona.as_ref().map(|p| p.traits),
        growth: persona.as_ref().map(|p| p.growth),
        total_messages,
        by_role,
        sessions: count(conn, "SELECT COUNT(DISTINCT session_id) FROM messages WHERE user_id = ?1", user_id)?,
        growth_log_entries: count(conn, "SELECT COUNT(*) FROM growth_log WHERE user_id = ?1", user_id)?,
        archived_summaries: count(conn, "SELECT COUNT(*) FROM session_summaries WHERE user_id = ?1", user_id)?,
        flagged_safety_events: count(
            conn,
            "SELECT COUNT(*) FROM safety_log WHERE user_id = ?1 AND flagged = 1",
            user_id,
        )?,
        first_message,
        last_message,
    })
}

fn count(conn: &Connection, sql: &str, user_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, params![user_id], |row| row.get(0))?;
    Ok(n as u64)
}

/// Message counts per role, with every role present.
fn count_by_role(conn: &Connection, user_id: &str) -> Result<HashMap<String, u64>> {
    let mut map = HashMap::new();
    for role in ["user", "ai"] {
        map.insert(role.to_string(), 0);
    }

    let mut stmt =
        conn.prepare("SELECT role, COUNT(*) FROM messages WHERE user_id = ?1 GROUP BY role")?;
    let rows = stmt
        .query_map(params![user_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (role, n) in rows {
        map.insert(role, n as u64);
    }
    Ok(map)
}

fn message_time_range(conn: &Connection, user_id: &str) -> Result<(Option<String>, Option<String>)> {
    let range = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM messages WHERE user_id = ?1",
        params![user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::persona::store;
    use crate::persona::types::{GrowthLogEntry, PersonaRecord, Role};
    use crate::signals::safety::SafetyIntent;

    #[test]
    fn unknown_user_has_zero_counts() {
        let conn = db::open_memory_database().unwrap();
        let stats = persona_stats(&conn, "nobody").unwrap();
        assert!(stats.traits.is_none());
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.by_role["user"], 0);
        assert_eq!(stats.by_role["ai"], 0);
        assert!(stats.first_message.is_none());
    }

    #[test]
    fn counts_cover_every_table() {
        let conn = db::open_memory_database().unwrap();
        store::save_persona(&conn, &PersonaRecord::new("u1")).unwrap();
        store::insert_message(&conn, "u1", "s1", Role::User, "hi").unwrap();
        store::insert_message(&conn, "u1", "s1", Role::Ai, "hello").unwrap();
        store::insert_message(&conn, "u1", "s2", Role::User, "again").unwrap();
        store::insert_message(&conn, "u2", "s9", Role::User, "other user").unwrap();
        store::append_growth_log(
            &conn,
            "u1",
            &GrowthLogEntry::snapshot(&TraitVector::neutral(), chrono::Utc::now()),
            10,
        )
        .unwrap();
        store::insert_session_summary(&conn, "u1", "s1", "summary").unwrap();
        store::write_safety_log(&conn, "u1", SafetyIntent::SoftRedirect, "つらい").unwrap();
        store::write_safety_log(&conn, "u1", SafetyIntent::None, "plain").unwrap();

        let stats = persona_stats(&conn, "u1").unwrap();
        assert_eq!(stats.traits, Some(TraitVector::neutral()));
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.by_role["user"], 2);
        assert_eq!(stats.by_role["ai"], 1);
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.growth_log_entries, 1);
        assert_eq!(stats.archived_summaries, 1);
        assert_eq!(stats.flagged_safety_events, 1);
        assert!(stats.first_message <= stats.last_message);
    }
}
