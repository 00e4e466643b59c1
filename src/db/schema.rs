//! SQL DDL for all Sigmaris tables.
//!
//! Defines the `personas`, `messages`, `growth_log`, `session_summaries`, and
//! `schema_meta` tables. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization. The `safety_log` table arrives with migration v2.

use rusqlite::Connection;

/// All schema DDL statements for Sigmaris's core tables.
const SCHEMA_SQL: &str = r#"
-- One row per user, upserted every turn
CREATE TABLE IF NOT EXISTS personas (
    user_id TEXT PRIMARY KEY,
    calm REAL NOT NULL DEFAULT 0.5 CHECK(calm >= 0.0 AND calm <= 1.0),
    empathy REAL NOT NULL DEFAULT 0.5 CHECK(empathy >= 0.0 AND empathy <= 1.0),
    curiosity REAL NOT NULL DEFAULT 0.5 CHECK(curiosity >= 0.0 AND curiosity <= 1.0),
    reflection TEXT NOT NULL DEFAULT '',
    meta_summary TEXT NOT NULL DEFAULT '',
    growth REAL NOT NULL DEFAULT 0.0,
    updated_at TEXT NOT NULL
);

-- Conversation log, append-only apart from compaction
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('user','ai')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(user_id, session_id, created_at);

-- Trait snapshots
CREATE TABLE IF NOT EXISTS growth_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    calm REAL NOT NULL,
    empathy REAL NOT NULL,
    curiosity REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_growth_user ON growth_log(user_id, id);

-- Compaction archive
CREATE TABLE IF NOT EXISTS session_summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_summaries_session ON session_summaries(user_id, session_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in ["personas", "messages", "growth_log", "session_summaries", "schema_meta"] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
        assert!(!tables.contains(&"safety_log".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn role_check_rejects_unknown_roles() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO messages (id, user_id, session_id, role, content, created_at) \
             VALUES ('m1', 'u', 's', 'system', 'hi', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
