#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{Duration, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection};
use sigmaris::config::SigmarisConfig;
use sigmaris::db;
use sigmaris::llm::{LanguageModel, LlmError};
use sigmaris::persona::types::Role;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Shared handle as the turn engine expects it.
pub fn shared_db() -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(test_db()))
}

/// Config with a fixed evolution seed so drift is reproducible.
pub fn test_config() -> SigmarisConfig {
    let mut config = SigmarisConfig::default();
    config.evolution.seed = Some(7);
    config
}

/// Insert one message with an explicit position-derived timestamp. Returns its id.
pub fn insert_at(
    conn: &Connection,
    user_id: &str,
    session_id: &str,
    position: usize,
    role: Role,
    content: &str,
) -> String {
    let id = format!("{session_id}-{position:05}");
    let created_at = (Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        + Duration::seconds(position as i64))
    .to_rfc3339_opts(SecondsFormat::Nanos, true);
    conn.execute(
        "INSERT INTO messages (id, user_id, session_id, role, content, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, user_id, session_id, role.as_str(), content, created_at],
    )
    .unwrap();
    id
}

/// Seed `pairs` user/ai turns starting at `start`. Returns ids in insertion order.
pub fn seed_pairs(conn: &Connection, user_id: &str, session_id: &str, start: usize, pairs: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(pairs * 2);
    for turn in 0..pairs {
        let pos = start + turn * 2;
        ids.push(insert_at(conn, user_id, session_id, pos, Role::User, &format!("質問{turn}")));
        ids.push(insert_at(conn, user_id, session_id, pos + 1, Role::Ai, &format!("答え{turn}")));
    }
    ids
}

pub fn remaining_ids(conn: &Connection, user_id: &str, session_id: &str) -> Vec<String> {
    sigmaris::persona::store::list_session_messages(conn, user_id, session_id)
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

type Responder = dyn Fn(&str, &str) -> Result<String, LlmError> + Send + Sync;

/// Language model driven by a closure over `(system, user)`; records every call.
pub struct ScriptedModel {
    respond: Box<Responder>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    pub fn new(respond: impl Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_, _| Err(LlmError::Unavailable("scripted failure".into())))
    }

    /// Routes by system prompt: meta JSON, reflection, summary, else `reply`.
    pub fn companion(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |system, _| {
            if system.contains("meta-reflection") {
                Ok(r#"```json
{"summary":"安定して対話できている","growthAdjustment":0.6,"nextFocus":"Empathy & Communication"}
```"#
                    .to_string())
            } else if system.contains("内省") {
                Ok("穏やかに寄り添えた".to_string())
            } else if system.contains("要約") {
                Ok("要約です".to_string())
            } else {
                Ok(reply.clone())
            }
        })
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        (self.respond)(system, user)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
