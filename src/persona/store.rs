//! Persistence for persona rows, messages, growth log, summaries, session context, and safety audit.
//!
//! Plain functions over a [`Connection`], plus the [`ConversationStore`] seam that
//! compaction runs against. Persona writes are upserts keyed by `user_id`.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::persona::types::{GrowthLogEntry, Message, PersonaRecord, Role, TraitVector};
use crate::signals::safety::SafetyIntent;
use crate::signals::self_ref::SelfReferentInfo;

/// Storage operations the compaction pass needs.
///
/// Implemented for [`rusqlite::Connection`]; tests substitute failing stores to
/// exercise partial-failure reporting.
pub trait ConversationStore {
    /// All messages of one session, oldest first.
    fn session_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<Message>>;

    /// Append a compaction summary to the archive.
    fn archive_summary(&self, user_id: &str, session_id: &str, summary: &str) -> Result<()>;

    /// Delete exactly the given message ids. Returns the backend's deleted count
    /// when it reports one.
    fn delete_messages(&mut self, ids: &[String]) -> Result<Option<usize>>;
}

impl ConversationStore for Connection {
    fn session_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<Message>> {
        list_session_messages(self, user_id, session_id)
    }

    fn archive_summary(&self, user_id: &str, session_id: &str, summary: &str) -> Result<()> {
        insert_session_summary(self, user_id, session_id, summary)
    }

    fn delete_messages(&mut self, ids: &[String]) -> Result<Option<usize>> {
        let tx = self.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM messages WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(Some(deleted))
    }
}

/// A connection shared across tasks. Each store operation takes the lock for
/// its own duration only, so a compaction pass never holds it while the model
/// is summarizing.
#[derive(Clone)]
pub struct SharedConnection(pub Arc<Mutex<Connection>>);

impl SharedConnection {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.0
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))
    }
}

impl ConversationStore for SharedConnection {
    fn session_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<Message>> {
        self.conn()?.session_messages(user_id, session_id)
    }

    fn archive_summary(&self, user_id: &str, session_id: &str, summary: &str) -> Result<()> {
        self.conn()?.archive_summary(user_id, session_id, summary)
    }

    fn delete_messages(&mut self, ids: &[String]) -> Result<Option<usize>> {
        self.conn()?.delete_messages(ids)
    }
}

// ── Personas ─────────────────────────────────────────────────────────────────

/// Load a persona row, or `None` for a user never seen before.
pub fn load_persona(conn: &Connection, user_id: &str) -> Result<Option<PersonaRecord>> {
    let record = conn
        .query_row(
            "SELECT calm, empathy, curiosity, reflection, meta_summary, growth, turn_count, updated_at \
             FROM personas WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(PersonaRecord {
                    user_id: user_id.to_string(),
                    traits: TraitVector::from_options(row.get(0)?, row.get(1)?, row.get(2)?),
                    reflection: row.get(3)?,
                    meta_summary: row.get(4)?,
                    growth: row.get(5)?,
                    turn_count: row.get::<_, i64>(6)? as u64,
                    updated_at: row.get(7)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("failed to load persona for {user_id}"))?;
    Ok(record)
}

/// Load a persona row, falling back to a fresh neutral persona.
pub fn load_or_default_persona(conn: &Connection, user_id: &str) -> Result<PersonaRecord> {
    Ok(load_persona(conn, user_id)?.unwrap_or_else(|| PersonaRecord::new(user_id)))
}

/// Upsert a persona row. `updated_at` is stamped with the current time.
pub fn save_persona(conn: &Connection, record: &PersonaRecord) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let traits = record.traits.clamped();
    conn.execute(
        "INSERT INTO personas (user_id, calm, empathy, curiosity, reflection, meta_summary, growth, turn_count, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(user_id) DO UPDATE SET \
             calm = excluded.calm, empathy = excluded.empathy, curiosity = excluded.curiosity, \
             reflection = excluded.reflection, meta_summary = excluded.meta_summary, \
             growth = excluded.growth, turn_count = excluded.turn_count, \
             updated_at = excluded.updated_at",
        params![
            record.user_id,
            traits.calm,
            traits.empathy,
            traits.curiosity,
            record.reflection,
            record.meta_summary,
            record.growth,
            record.turn_count as i64,
            now,
        ],
    )
    .with_context(|| format!("failed to save persona for {}", record.user_id))?;
    Ok(())
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// Append one message to a session. Returns the stored message.
pub fn insert_message(
    conn: &Connection,
    user_id: &str,
    session_id: &str,
    role: Role,
    content: &str,
) -> Result<Message> {
    let message = Message {
        id: uuid::Uuid::now_v7().to_string(),
        user_id: user_id.to_string(),
        session_id: session_id.to_string(),
        role,
        content: content.to_string(),
        created_at: sortable_timestamp(),
    };
    conn.execute(
        "INSERT INTO messages (id, user_id, session_id, role, content, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.user_id,
            message.session_id,
            message.role.as_str(),
            message.content,
            message.created_at,
        ],
    )?;
    Ok(message)
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn sortable_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// All messages of one session ordered by creation time (ids break ties).
pub fn list_session_messages(
    conn: &Connection,
    user_id: &str,
    session_id: &str,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, created_at FROM messages \
         WHERE user_id = ?1 AND session_id = ?2 \
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![user_id, session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, role, content, created_at)| {
            let role = role.parse::<Role>().map_err(anyhow::Error::msg)?;
            Ok(Message {
                id,
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                role,
                content,
                created_at,
            })
        })
        .collect()
}

pub fn count_session_messages(conn: &Connection, user_id: &str, session_id: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE user_id = ?1 AND session_id = ?2",
        params![user_id, session_id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

// ── Growth log ───────────────────────────────────────────────────────────────

/// Append a growth-log entry and trim the user's log to `retention` rows.
pub fn append_growth_log(
    conn: &Connection,
    user_id: &str,
    entry: &GrowthLogEntry,
    retention: usize,
) -> Result<()> {
    conn.execute(
        "INSERT INTO growth_log (user_id, calm, empathy, curiosity, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            entry.calm,
            entry.empathy,
            entry.curiosity,
            entry.timestamp.to_rfc3339(),
        ],
    )?;
    let trimmed = conn.execute(
        "DELETE FROM growth_log WHERE user_id = ?1 AND id NOT IN \
         (SELECT id FROM growth_log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2)",
        params![user_id, retention as i64],
    )?;
    if trimmed > 0 {
        tracing::debug!(user_id, trimmed, "growth log trimmed");
    }
    Ok(())
}

/// The most recent `limit` growth-log entries, oldest first.
pub fn load_growth_log(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<GrowthLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT calm, empathy, curiosity, created_at FROM growth_log \
         WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let mut entries = stmt
        .query_map(params![user_id, limit as i64], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(calm, empathy, curiosity, created_at)| {
            let timestamp = DateTime::parse_from_rfc3339(&created_at)
                .with_context(|| format!("bad growth log timestamp: {created_at}"))?
                .with_timezone(&Utc);
            Ok(GrowthLogEntry {
                calm,
                empathy,
                curiosity,
                timestamp,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    entries.reverse();
    Ok(entries)
}

pub fn count_growth_log(conn: &Connection, user_id: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM growth_log WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

// ── Session context ──────────────────────────────────────────────────────────

/// The last self-reference reading stored for a session, if any.
pub fn load_session_self_ref(
    conn: &Connection,
    user_id: &str,
    session_id: &str,
) -> Result<Option<SelfReferentInfo>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT self_ref FROM session_context WHERE user_id = ?1 AND session_id = ?2",
            params![user_id, session_id],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|json| {
        serde_json::from_str(&json)
            .with_context(|| format!("bad session context for {user_id}/{session_id}"))
    })
    .transpose()
}

/// Replace the session's stored reading. The `previous` link is not stored.
pub fn save_session_self_ref(
    conn: &Connection,
    user_id: &str,
    session_id: &str,
    info: &SelfReferentInfo,
) -> Result<()> {
    let json = serde_json::to_string(&info.detached())?;
    conn.execute(
        "INSERT INTO session_context (user_id, session_id, self_ref, updated_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(user_id, session_id) DO UPDATE SET \
             self_ref = excluded.self_ref, updated_at = excluded.updated_at",
        params![user_id, session_id, json, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ── Summaries and audit ──────────────────────────────────────────────────────

pub fn insert_session_summary(
    conn: &Connection,
    user_id: &str,
    session_id: &str,
    summary: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO session_summaries (user_id, session_id, summary, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, session_id, summary, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Write an entry to the safety_log audit table.
pub fn write_safety_log(
    conn: &Connection,
    user_id: &str,
    intent: SafetyIntent,
    message: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO safety_log (user_id, level, flagged, message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            intent.as_str(),
            intent.is_flagged(),
            message,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}
