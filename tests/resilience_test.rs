use sigmaris::db;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");

    // Should not exist yet
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();

    // Should have been created
    assert!(db_path.exists());

    // Should be functional
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM personas", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn reopening_keeps_data() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("persona.db");

    {
        let conn = db::open_database(&db_path).unwrap();
        let mut record = sigmaris::persona::types::PersonaRecord::new("u1");
        record.turn_count = 3;
        sigmaris::persona::store::save_persona(&conn, &record).unwrap();
    }

    let conn = db::open_database(&db_path).unwrap();
    let loaded = sigmaris::persona::store::load_persona(&conn, "u1").unwrap().unwrap();
    assert_eq!(loaded.turn_count, 3);
}

#[test]
fn health_check_passes_on_valid_db() {
    let conn = db::open_memory_database().unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert_eq!(report.persona_count, 0);
    assert_eq!(report.message_count, 0);
    assert_eq!(report.growth_log_count, 0);
    assert_eq!(report.summary_count, 0);
    assert_eq!(report.safety_log_count, 0);
}

#[test]
fn busy_timeout_is_set() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");

    let conn = db::open_database(&db_path).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
}
