mod helpers;

use sigmaris::db;
use sigmaris::db::migrations::{get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};

fn column_names(conn: &rusqlite::Connection, table: &str) -> Vec<String> {
    conn.prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn has_table(conn: &rusqlite::Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn migrations_are_idempotent() {
    let conn = helpers::test_db();
    // Running again should be a no-op
    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn manual_v1_db_upgrades_correctly() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    db::schema::init_schema(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(!has_table(&conn, "safety_log"));
    assert!(!has_table(&conn, "session_context"));
    assert!(!column_names(&conn, "personas").contains(&"turn_count".to_string()));

    run_migrations(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(has_table(&conn, "safety_log"));
    assert!(has_table(&conn, "session_context"));
    assert!(column_names(&conn, "personas").contains(&"turn_count".to_string()));
}

#[test]
fn existing_personas_survive_the_upgrade() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    db::schema::init_schema(&conn).unwrap();
    conn.execute(
        "INSERT INTO personas (user_id, calm, empathy, curiosity, updated_at) \
         VALUES ('u1', 0.7, 0.4, 0.6, '2026-01-01T00:00:00Z')",
        [],
    )
    .unwrap();

    run_migrations(&conn).unwrap();

    let persona = sigmaris::persona::store::load_persona(&conn, "u1")
        .unwrap()
        .unwrap();
    assert_eq!(persona.turn_count, 0);
    assert!((persona.traits.calm - 0.7).abs() < 1e-9);
}
