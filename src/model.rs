//! Record types shared by the storage, API, and UI layers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a run or a single step within a run.
///
/// A run is created as `New`, claimed by the external runner (`Running`),
/// and finished in one of the four terminal states. This subsystem only
/// ever writes `New`; everything after that is the runner's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
}

impl Default for Status {
    fn default() -> Self {
        Self::New
    }
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    /// True while the run is still waiting for, or held by, the runner.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::New | Self::Running)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "running" => Ok(Self::Running),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// A user-authored scenario: name, Gherkin-flavored step text, and tags.
#[derive(Debug, Clone, Serialize)]
pub struct Test {
    pub id: i64,
    pub user: String,
    pub name: String,
    pub steps: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One execution attempt of a test.
///
/// Created here in status `new`; the `status`, `text`, and `duration`
/// fields are written once by the runner and frozen afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub id: i64,
    pub test_id: i64,
    pub user: String,
    pub example_text: String,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub text: String,
    pub duration: f64,
}

/// One step's outcome within a run, immutable once written by the runner.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunStep {
    pub id: i64,
    pub run_id: i64,
    pub num: i64,
    /// 1-based row index into the outline's example table.
    pub example_row_num: i64,
    pub text: String,
    pub status: Status,
    pub timestamp_start: Option<DateTime<Utc>>,
    pub timestamp_end: Option<DateTime<Utc>>,
    pub duration: f64,
    /// Opaque object-storage key, never a URL. Empty when no screenshot.
    pub screenshot_key: String,
}

/// Append-only snapshot of a test's steps taken on every save.
#[derive(Debug, Clone, Serialize)]
pub struct TestEditHistory {
    pub id: i64,
    pub test_id: i64,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub version: i64,
    pub steps: String,
}

/// Keep only tests whose tag set is a superset of `required` (AND
/// semantics). The caller feeds this the broader any-of-these-tags query
/// result; the output is identical to a direct superset check over the
/// unfiltered collection.
pub fn filter_tags(tests: Vec<Test>, required: &BTreeSet<String>) -> Vec<Test> {
    tests
        .into_iter()
        .filter(|t| {
            let own: BTreeSet<&str> = t.tags.iter().map(String::as_str).collect();
            required.iter().all(|r| own.contains(r.as_str()))
        })
        .collect()
}
