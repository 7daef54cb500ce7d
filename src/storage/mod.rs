//! SQLite storage layer -- schema, queries, migrations.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::model::{Status, Test, TestEditHistory, TestRun, TestRunStep};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Record type key used in the generic tagging tables.
const TAG_CONTENT_TYPE: &str = "test";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// All queries over the scenario tables. Cheap to clone; handlers hold one.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    /// Insert or update a test, replace its tag set, and append an edit
    /// history snapshot, all in one immediate transaction. Computing the
    /// next history version inside the same transaction serializes
    /// concurrent edits of the same test.
    pub fn save_test(
        &self,
        id: Option<i64>,
        user: &str,
        name: &str,
        steps: &str,
        tags: &[String],
    ) -> Result<Test> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now();
        let (test_id, created_at) = match id {
            Some(id) => {
                let changed = tx.execute(
                    "UPDATE scenarios SET user = ?1, name = ?2, steps = ?3 WHERE id = ?4",
                    params![user, name, steps, id],
                )?;
                if changed == 0 {
                    anyhow::bail!("no test found with id {}", id);
                }
                let created_at: DateTime<Utc> = tx.query_row(
                    "SELECT created_at FROM scenarios WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                (id, created_at)
            }
            None => {
                tx.execute(
                    "INSERT INTO scenarios (user, name, steps, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![user, name, steps, now],
                )?;
                (tx.last_insert_rowid(), now)
            }
        };

        // Replace the tag associations for this test
        tx.execute(
            "DELETE FROM tagged_items WHERE content_type = ?1 AND object_id = ?2",
            params![TAG_CONTENT_TYPE, test_id],
        )?;
        let mut clean_tags = Vec::new();
        for tag in tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            tx.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![tag])?;
            tx.execute(
                "INSERT OR IGNORE INTO tagged_items (tag_id, content_type, object_id)
                 SELECT id, ?2, ?3 FROM tags WHERE name = ?1",
                params![tag, TAG_CONTENT_TYPE, test_id],
            )?;
            clean_tags.push(tag.to_string());
        }

        let version: i64 = tx.query_row(
            "SELECT COUNT(*) + 1 FROM scenario_edit_history WHERE test_id = ?1",
            params![test_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO scenario_edit_history (test_id, user, timestamp, version, steps)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![test_id, user, now, version, steps],
        )?;
        tracing::debug!(test_id, version, %user, "saved test and history snapshot");

        tx.commit().context("failed to commit test save")?;

        Ok(Test {
            id: test_id,
            user: user.to_string(),
            name: name.to_string(),
            steps: steps.to_string(),
            tags: clean_tags,
            created_at,
        })
    }

    pub fn get_test(&self, id: i64) -> Result<Option<Test>> {
        let conn = self.pool.get()?;
        let test = conn
            .query_row(
                "SELECT id, user, name, steps, created_at FROM scenarios WHERE id = ?1",
                params![id],
                test_from_row,
            )
            .optional()?;
        match test {
            Some(mut test) => {
                test.tags = tags_for_test(&conn, test.id)?;
                Ok(Some(test))
            }
            None => Ok(None),
        }
    }

    /// All tests, newest first.
    pub fn list_tests(&self) -> Result<Vec<Test>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT id, user, name, steps, created_at FROM scenarios ORDER BY id DESC")?;
        let rows = stmt.query_map([], test_from_row)?;

        let mut tests = Vec::new();
        for row in rows {
            let mut test = row?;
            test.tags = tags_for_test(&conn, test.id)?;
            tests.push(test);
        }
        Ok(tests)
    }

    /// Tests carrying at least one of the given tags, ordered by name.
    /// This is the broad OR query; AND semantics come from running
    /// `model::filter_tags` over the result.
    pub fn list_tests_with_any_tag(&self, tags: &[String]) -> Result<Vec<Test>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get()?;
        let placeholders = (1..=tags.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT DISTINCT s.id, s.user, s.name, s.steps, s.created_at
             FROM scenarios s
             JOIN tagged_items ti ON ti.content_type = '{}' AND ti.object_id = s.id
             JOIN tags t ON t.id = ti.tag_id
             WHERE t.name IN ({})
             ORDER BY s.name",
            TAG_CONTENT_TYPE, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(tags.iter()), test_from_row)?;

        let mut tests = Vec::new();
        for row in rows {
            let mut test = row?;
            test.tags = tags_for_test(&conn, test.id)?;
            tests.push(test);
        }
        Ok(tests)
    }

    /// Delete a test; runs, steps, and history go with it via cascade.
    pub fn delete_test(&self, id: i64) -> Result<bool> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM tagged_items WHERE content_type = ?1 AND object_id = ?2",
            params![TAG_CONTENT_TYPE, id],
        )?;
        let changed = conn.execute("DELETE FROM scenarios WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Every known tag name, sorted.
    pub fn all_tags(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT name FROM tags ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    pub fn history_for_test(&self, test_id: i64) -> Result<Vec<TestEditHistory>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, test_id, user, timestamp, version, steps
             FROM scenario_edit_history WHERE test_id = ?1 ORDER BY version",
        )?;
        let rows = stmt.query_map(params![test_id], |row| {
            Ok(TestEditHistory {
                id: row.get(0)?,
                test_id: row.get(1)?,
                user: row.get(2)?,
                timestamp: row.get(3)?,
                version: row.get(4)?,
                steps: row.get(5)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Create a run in status `new` for the runner to pick up.
    pub fn create_run(&self, test_id: i64, user: &str, example_text: &str) -> Result<TestRun> {
        let conn = self.pool.get()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO scenario_runs (test_id, user, example_text, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, 'new')",
            params![test_id, user, example_text, now],
        )
        .context("failed to insert test run")?;

        Ok(TestRun {
            id: conn.last_insert_rowid(),
            test_id,
            user: user.to_string(),
            example_text: example_text.to_string(),
            timestamp: now,
            status: Status::New,
            text: String::new(),
            duration: 0.0,
        })
    }

    pub fn get_run(&self, id: i64) -> Result<Option<TestRun>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT id, test_id, user, example_text, timestamp, status, text, duration
                 FROM scenario_runs WHERE id = ?1",
                params![id],
                run_from_row,
            )
            .optional()?)
    }

    pub fn latest_run_for_test(&self, test_id: i64) -> Result<Option<TestRun>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT id, test_id, user, example_text, timestamp, status, text, duration
                 FROM scenario_runs WHERE test_id = ?1 ORDER BY id DESC LIMIT 1",
                params![test_id],
                run_from_row,
            )
            .optional()?)
    }

    /// Runs for a test, newest first.
    pub fn runs_for_test(&self, test_id: i64) -> Result<Vec<TestRun>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, test_id, user, example_text, timestamp, status, text, duration
             FROM scenario_runs WHERE test_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![test_id], run_from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Every run in the system, newest first.
    pub fn all_runs(&self) -> Result<Vec<TestRun>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, test_id, user, example_text, timestamp, status, text, duration
             FROM scenario_runs ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], run_from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Runs still waiting for the runner (new or running), in queue order.
    pub fn pending_runs(&self) -> Result<Vec<TestRun>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, test_id, user, example_text, timestamp, status, text, duration
             FROM scenario_runs WHERE status IN ('new', 'running') ORDER BY id",
        )?;
        let rows = stmt.query_map([], run_from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// How many pending runs sit strictly ahead of this one. Runs are
    /// claimed in id order (first created, first run), so a smaller id
    /// with status new/running is ahead of us.
    pub fn count_runs_ahead(&self, run: &TestRun) -> Result<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM scenario_runs
             WHERE status IN ('new', 'running') AND id < ?1",
            params![run.id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Steps in display order: grouped by example row, then step order.
    pub fn steps_for_run(&self, run_id: i64) -> Result<Vec<TestRunStep>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, num, example_row_num, text, status,
                    timestamp_start, timestamp_end, duration, screenshot_key
             FROM scenario_run_steps WHERE run_id = ?1 ORDER BY example_row_num, num",
        )?;
        let rows = stmt.query_map(params![run_id], step_from_row)?;
        let mut steps = Vec::new();
        for row in rows {
            steps.push(row?);
        }
        Ok(steps)
    }

    /// Steps in execution order, for the API listing.
    pub fn steps_for_run_by_num(&self, run_id: i64) -> Result<Vec<TestRunStep>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, num, example_row_num, text, status,
                    timestamp_start, timestamp_end, duration, screenshot_key
             FROM scenario_run_steps WHERE run_id = ?1 ORDER BY num",
        )?;
        let rows = stmt.query_map(params![run_id], step_from_row)?;
        let mut steps = Vec::new();
        for row in rows {
            steps.push(row?);
        }
        Ok(steps)
    }

    // ------------------------------------------------------------------
    // Runner-side writes. The external runner shares this database; these
    // are the operations it performs as steps execute and the run ends.
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn record_step(
        &self,
        run_id: i64,
        num: i64,
        example_row_num: i64,
        text: &str,
        status: Status,
        timestamp_start: Option<DateTime<Utc>>,
        timestamp_end: Option<DateTime<Utc>>,
        duration: f64,
        screenshot_key: &str,
    ) -> Result<TestRunStep> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO scenario_run_steps
             (run_id, num, example_row_num, text, status, timestamp_start, timestamp_end, duration, screenshot_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                num,
                example_row_num,
                text,
                status.as_str(),
                timestamp_start,
                timestamp_end,
                duration,
                screenshot_key
            ],
        )
        .context("failed to insert run step")?;

        Ok(TestRunStep {
            id: conn.last_insert_rowid(),
            run_id,
            num,
            example_row_num,
            text: text.to_string(),
            status,
            timestamp_start,
            timestamp_end,
            duration,
            screenshot_key: screenshot_key.to_string(),
        })
    }

    /// Write the run's final status, report text, and duration.
    pub fn finish_run(&self, run_id: i64, status: Status, text: &str, duration: f64) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE scenario_runs SET status = ?1, text = ?2, duration = ?3 WHERE id = ?4",
            params![status.as_str(), text, duration, run_id],
        )?;
        if changed == 0 {
            anyhow::bail!("no run found with id {}", run_id);
        }
        Ok(())
    }

    /// Mark a run as claimed by the runner.
    pub fn mark_run_running(&self, run_id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE scenario_runs SET status = 'running' WHERE id = ?1",
            params![run_id],
        )?;
        Ok(())
    }
}

/// Tag names for one test, on the caller's connection. Callers already
/// hold a checkout; taking a second one here would exhaust a small pool.
fn tags_for_test(conn: &rusqlite::Connection, test_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM tags t
         JOIN tagged_items ti ON ti.tag_id = t.id
         WHERE ti.content_type = ?1 AND ti.object_id = ?2
         ORDER BY t.name",
    )?;
    let rows = stmt.query_map(params![TAG_CONTENT_TYPE, test_id], |row| row.get(0))?;
    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

fn test_from_row(row: &Row) -> rusqlite::Result<Test> {
    Ok(Test {
        id: row.get(0)?,
        user: row.get(1)?,
        name: row.get(2)?,
        steps: row.get(3)?,
        tags: Vec::new(),
        created_at: row.get(4)?,
    })
}

fn run_from_row(row: &Row) -> rusqlite::Result<TestRun> {
    let status: String = row.get(5)?;
    Ok(TestRun {
        id: row.get(0)?,
        test_id: row.get(1)?,
        user: row.get(2)?,
        example_text: row.get(3)?,
        timestamp: row.get(4)?,
        status: parse_status(status, 5)?,
        text: row.get(6)?,
        duration: row.get(7)?,
    })
}

fn step_from_row(row: &Row) -> rusqlite::Result<TestRunStep> {
    let status: String = row.get(5)?;
    Ok(TestRunStep {
        id: row.get(0)?,
        run_id: row.get(1)?,
        num: row.get(2)?,
        example_row_num: row.get(3)?,
        text: row.get(4)?,
        status: parse_status(status, 5)?,
        timestamp_start: row.get(6)?,
        timestamp_end: row.get(7)?,
        duration: row.get(8)?,
        screenshot_key: row.get(9)?,
    })
}

fn parse_status(raw: String, idx: usize) -> rusqlite::Result<Status> {
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
pub(crate) fn test_pool() -> Pool {
    // A single shared in-memory connection; more than one would each get
    // their own empty database.
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = R2D2Pool::builder().max_size(1).build(manager).unwrap();
    schema::migrate(&pool.get().unwrap()).unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::new(test_pool())
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_save_and_get_round_trip() {
        let store = store();
        let test = store
            .save_test(None, "alice", "login works", "Given a user", &tags(&["smoke", "login"]))
            .unwrap();
        let fetched = store.get_test(test.id).unwrap().unwrap();
        assert_eq!(fetched.name, "login works");
        assert_eq!(fetched.user, "alice");
        assert_eq!(fetched.tags, vec!["login", "smoke"]);
    }

    #[test]
    fn test_update_replaces_tags_and_appends_history() {
        let store = store();
        let test = store
            .save_test(None, "alice", "t", "v1", &tags(&["old"]))
            .unwrap();
        store
            .save_test(Some(test.id), "bob", "t", "v2", &tags(&["fresh"]))
            .unwrap();

        let fetched = store.get_test(test.id).unwrap().unwrap();
        assert_eq!(fetched.steps, "v2");
        assert_eq!(fetched.tags, vec!["fresh"]);

        let history = store.history_for_test(test.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].steps, "v1");
        assert_eq!(history[0].user, "alice");
        assert_eq!(history[1].version, 2);
        assert_eq!(history[1].steps, "v2");
        assert_eq!(history[1].user, "bob");
    }

    #[test]
    fn test_update_missing_test_fails() {
        let store = store();
        assert!(store.save_test(Some(42), "a", "b", "c", &[]).is_err());
    }

    #[test]
    fn test_delete_cascades_to_runs_steps_and_history() {
        let store = store();
        let test = store.save_test(None, "alice", "t", "s", &[]).unwrap();
        let run = store.create_run(test.id, "alice", "").unwrap();
        store
            .record_step(run.id, 1, 1, "Given x", Status::Passed, None, None, 0.1, "")
            .unwrap();

        assert!(store.delete_test(test.id).unwrap());
        assert!(store.get_test(test.id).unwrap().is_none());
        assert!(store.get_run(run.id).unwrap().is_none());
        assert!(store.steps_for_run(run.id).unwrap().is_empty());
        assert!(store.history_for_test(test.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_test_reports_false() {
        let store = store();
        assert!(!store.delete_test(999).unwrap());
    }

    #[test]
    fn test_any_tag_query_is_or_semantics() {
        let store = store();
        store.save_test(None, "a", "one", "s", &tags(&["x"])).unwrap();
        store.save_test(None, "a", "two", "s", &tags(&["y"])).unwrap();
        store.save_test(None, "a", "three", "s", &tags(&["z"])).unwrap();

        let found = store.list_tests_with_any_tag(&tags(&["x", "y"])).unwrap();
        let names: Vec<&str> = found.iter().map(|t| t.name.as_str()).collect();
        // ordered by name
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn test_runs_ahead_counts_pending_smaller_ids_only() {
        let store = store();
        let test = store.save_test(None, "a", "t", "s", &[]).unwrap();
        let first = store.create_run(test.id, "a", "").unwrap();
        let second = store.create_run(test.id, "a", "").unwrap();
        let third = store.create_run(test.id, "a", "").unwrap();

        assert_eq!(store.count_runs_ahead(&first).unwrap(), 0);
        assert_eq!(store.count_runs_ahead(&third).unwrap(), 2);

        // a finished run no longer occupies a queue slot
        store.finish_run(first.id, Status::Passed, "", 1.0).unwrap();
        assert_eq!(store.count_runs_ahead(&third).unwrap(), 1);

        // a running one still does
        store.mark_run_running(second.id).unwrap();
        assert_eq!(store.count_runs_ahead(&third).unwrap(), 1);
    }

    #[test]
    fn test_steps_display_order_groups_by_example_row() {
        let store = store();
        let test = store.save_test(None, "a", "t", "s", &[]).unwrap();
        let run = store.create_run(test.id, "a", "").unwrap();
        store.record_step(run.id, 1, 2, "row2 step1", Status::Passed, None, None, 0.0, "").unwrap();
        store.record_step(run.id, 2, 1, "row1 step2", Status::Passed, None, None, 0.0, "").unwrap();
        store.record_step(run.id, 1, 1, "row1 step1", Status::Passed, None, None, 0.0, "").unwrap();

        let steps = store.steps_for_run(run.id).unwrap();
        let display: Vec<&str> = steps.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(display, vec!["row1 step1", "row1 step2", "row2 step1"]);
    }

    #[test]
    fn test_reads_share_one_pool_connection() {
        // The pool here holds exactly one connection, so any read path
        // that checked out a second connection while still holding the
        // first would block until the r2d2 timeout and fail.
        let store = store();
        let test = store
            .save_test(None, "alice", "t", "s", &tags(&["smoke"]))
            .unwrap();

        let started = std::time::Instant::now();
        let fetched = store.get_test(test.id).unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["smoke"]);
        assert_eq!(store.list_tests().unwrap().len(), 1);
        assert_eq!(
            store.list_tests_with_any_tag(&tags(&["smoke"])).unwrap().len(),
            1
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_latest_run_and_listings() {
        let store = store();
        let test = store.save_test(None, "a", "t", "s", &[]).unwrap();
        let r1 = store.create_run(test.id, "a", "").unwrap();
        let r2 = store.create_run(test.id, "a", "").unwrap();

        assert_eq!(store.latest_run_for_test(test.id).unwrap().unwrap().id, r2.id);
        let listed = store.runs_for_test(test.id).unwrap();
        assert_eq!(listed[0].id, r2.id);
        assert_eq!(listed[1].id, r1.id);

        store.finish_run(r1.id, Status::Failed, "boom", 2.5).unwrap();
        let pending = store.pending_runs().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, r2.id);

        let finished = store.get_run(r1.id).unwrap().unwrap();
        assert_eq!(finished.status, Status::Failed);
        assert_eq!(finished.text, "boom");
        assert!((finished.duration - 2.5).abs() < f64::EPSILON);
    }
}
