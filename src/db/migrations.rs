//! Forward-only migrations for the persona database.
//!
//! The version lives in `schema_meta`. v2 adds the safety audit table, v3 adds
//! the per-user turn counter, v4 adds per-session self-reference context.

use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: u32 = 4;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations. Each migration runs in a transaction.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let tx = conn.unchecked_transaction()?;
        match next {
            2 => migrate_v1_to_v2(&tx)?,
            3 => migrate_v2_to_v3(&tx)?,
            4 => migrate_v3_to_v4(&tx)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: audit table for flagged safety classifications.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS safety_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            level TEXT NOT NULL CHECK(level IN ('none','soft-redirect','boundary','crisis')),
            flagged INTEGER NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_safety_user ON safety_log(user_id);",
    )
}

/// Migration v2 → v3: per-user turn counter for scheduling meta-reflection.
fn migrate_v2_to_v3(conn: &Connection) -> rusqlite::Result<()> {
    let has_column: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('personas') WHERE name = 'turn_count'",
        [],
        |row| row.get(0),
    )?;
    if !has_column {
        conn.execute_batch(
            "ALTER TABLE personas ADD COLUMN turn_count INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    Ok(())
}

/// Migration v3 → v4: last self-reference reading per session, so the
/// continuation rule works across process restarts.
fn migrate_v3_to_v4(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_context (
            user_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            self_ref TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, session_id)
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn has_table(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn get_schema_version_returns_1_on_fresh_db() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn run_migrations_upgrades_to_current() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn migration_v1_to_v2_adds_safety_log() {
        let conn = test_db();
        assert!(!has_table(&conn, "safety_log"));

        run_migrations(&conn).unwrap();

        assert!(has_table(&conn, "safety_log"));
    }

    #[test]
    fn migration_v2_to_v3_adds_turn_count() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO personas (user_id, updated_at) VALUES ('old', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let turns: i64 = conn
            .query_row("SELECT turn_count FROM personas WHERE user_id = 'old'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(turns, 0);
    }

    #[test]
    fn migration_v3_to_v4_adds_session_context() {
        let conn = test_db();
        assert!(!has_table(&conn, "session_context"));

        run_migrations(&conn).unwrap();

        assert!(has_table(&conn, "session_context"));
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap(); // second call should not error
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
