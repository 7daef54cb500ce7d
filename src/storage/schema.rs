//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS scenarios (
            id INTEGER PRIMARY KEY,
            user TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            steps TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS scenario_runs (
            id INTEGER PRIMARY KEY,
            test_id INTEGER NOT NULL REFERENCES scenarios(id) ON DELETE CASCADE,
            user TEXT NOT NULL,
            example_text TEXT NOT NULL DEFAULT '',
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            status TEXT NOT NULL DEFAULT 'new',
            text TEXT NOT NULL DEFAULT '',
            duration REAL NOT NULL DEFAULT 0.0
        );
        CREATE INDEX IF NOT EXISTS idx_scenario_runs_test ON scenario_runs(test_id);
        CREATE INDEX IF NOT EXISTS idx_scenario_runs_status ON scenario_runs(status);

        CREATE TABLE IF NOT EXISTS scenario_run_steps (
            id INTEGER PRIMARY KEY,
            run_id INTEGER NOT NULL REFERENCES scenario_runs(id) ON DELETE CASCADE,
            num INTEGER NOT NULL,
            example_row_num INTEGER NOT NULL DEFAULT 1,
            text TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'new',
            timestamp_start TEXT,
            timestamp_end TEXT,
            duration REAL NOT NULL DEFAULT 0.0,
            screenshot_key TEXT NOT NULL DEFAULT '',
            UNIQUE (run_id, example_row_num, num)
        );
        CREATE INDEX IF NOT EXISTS idx_scenario_run_steps_run ON scenario_run_steps(run_id);

        CREATE TABLE IF NOT EXISTS scenario_edit_history (
            id INTEGER PRIMARY KEY,
            test_id INTEGER NOT NULL REFERENCES scenarios(id) ON DELETE CASCADE,
            user TEXT NOT NULL,
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            version INTEGER NOT NULL DEFAULT 1,
            steps TEXT NOT NULL DEFAULT '',
            UNIQUE (test_id, version)
        );
        CREATE INDEX IF NOT EXISTS idx_scenario_edit_history_test ON scenario_edit_history(test_id);

        -- Generic tagging facility: tag names plus associations keyed by
        -- record type and id, so other record types can be tagged later
        -- without schema changes.
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS tagged_items (
            id INTEGER PRIMARY KEY,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            content_type TEXT NOT NULL,
            object_id INTEGER NOT NULL,
            UNIQUE (tag_id, content_type, object_id)
        );
        CREATE INDEX IF NOT EXISTS idx_tagged_items_object ON tagged_items(content_type, object_id);

        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            value REAL NOT NULL DEFAULT 1.0,
            dimensions_json TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics(name);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        // Verify tables exist by querying them
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scenarios", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scenario_edit_history", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tagged_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_duplicate_step_position_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO scenarios (user) VALUES ('a@b')", [])
            .unwrap();
        conn.execute("INSERT INTO scenario_runs (test_id, user) VALUES (1, 'a@b')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO scenario_run_steps (run_id, num, example_row_num) VALUES (1, 1, 1)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO scenario_run_steps (run_id, num, example_row_num) VALUES (1, 1, 1)",
            [],
        );
        assert!(dup.is_err());
    }
}
