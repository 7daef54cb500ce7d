//! Count metrics written to the metrics table.
//!
//! A deliberately small sink: one row per observation, aggregated by
//! whatever reads the table later. The handle is constructed once and
//! passed in rather than reached through a process-wide client, so tests
//! can point it at an in-memory database.

use anyhow::Result;
use rusqlite::params;
use serde_json::Value;

use crate::storage::Pool;

pub const METRIC_EMAIL_RESULTS_SENT: &str = "EmailResultsSent";
pub const METRIC_EMAIL_RESULTS_FAILURE: &str = "EmailResultsFailure";

#[derive(Clone)]
pub struct Metrics {
    pool: Pool,
}

impl Metrics {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Record one count of `name`, optionally dimensioned.
    pub fn count(&self, name: &str, dimensions: Option<&Value>) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO metrics (name, value, dimensions_json) VALUES (?1, 1.0, ?2)",
            params![name, dimensions.map(|d| d.to_string())],
        )?;
        Ok(())
    }

    /// Sum of all observations for a metric name.
    pub fn total(&self, name: &str) -> Result<f64> {
        let conn = self.pool.get()?;
        let total = conn.query_row(
            "SELECT COALESCE(SUM(value), 0.0) FROM metrics WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_pool;
    use serde_json::json;

    #[test]
    fn counts_accumulate_per_name() {
        let metrics = Metrics::new(test_pool());
        metrics.count("EmailResultsSent", None).unwrap();
        metrics
            .count("EmailResultsSent", Some(&json!({"email": "a@b"})))
            .unwrap();

        assert_eq!(metrics.total("EmailResultsSent").unwrap(), 2.0);
        assert_eq!(metrics.total("EmailResultsFailure").unwrap(), 0.0);
    }
}
