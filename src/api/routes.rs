//! REST API handlers.
//!
//! Responses follow the original wire contract: records as flat JSON
//! objects, step listings wrapped as `{"steps": [...]}` and unpaginated
//! (callers fetching steps want the complete set), and every failure a
//! `{"error": ...}` body.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::model::{Status, Test, TestRun, TestRunStep};
use crate::runs::plan_run;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/tests", get(list_tests))
        .route(
            "/tests/{test_id}",
            get(get_test).put(update_test).delete(delete_test),
        )
        .route("/tests/{test_id}/start", post(start_test))
        .route("/tests/{test_id}/history", get(list_history))
        .route("/tests/{test_id}/runs", get(list_runs))
        .route("/tests/{test_id}/runs/{run_id}", get(get_run))
        .route("/tests/{test_id}/runs/{run_id}/steps", get(list_steps))
}

#[derive(Serialize)]
struct TestBody {
    id: i64,
    user: String,
    name: String,
    steps: String,
}

impl From<Test> for TestBody {
    fn from(t: Test) -> Self {
        Self {
            id: t.id,
            user: t.user,
            name: t.name,
            steps: t.steps,
        }
    }
}

#[derive(Serialize)]
struct RunBody {
    id: i64,
    example_text: String,
    status: Status,
    text: String,
    duration: f64,
}

impl From<TestRun> for RunBody {
    fn from(r: TestRun) -> Self {
        Self {
            id: r.id,
            example_text: r.example_text,
            status: r.status,
            text: r.text,
            duration: r.duration,
        }
    }
}

#[derive(Serialize)]
struct StepBody {
    id: i64,
    num: i64,
    example_row_num: i64,
    text: String,
    status: Status,
    timestamp_start: Option<DateTime<Utc>>,
    timestamp_end: Option<DateTime<Utc>>,
    duration: f64,
    /// Derived from the stored key on every read; empty when the step has
    /// no screenshot.
    screenshot_url: String,
}

impl StepBody {
    fn new(step: TestRunStep, state: &AppState) -> Self {
        let screenshot_url = state.signer.url_for(&step.screenshot_key);
        Self {
            id: step.id,
            num: step.num,
            example_row_num: step.example_row_num,
            text: step.text,
            status: step.status,
            timestamp_start: step.timestamp_start,
            timestamp_end: step.timestamp_end,
            duration: step.duration,
            screenshot_url,
        }
    }
}

#[derive(Deserialize)]
struct UpdateTestBody {
    user: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    steps: String,
}

#[derive(Deserialize, Default)]
struct StartBody {
    user: Option<String>,
    examples: Option<Value>,
}

async fn list_tests(State(state): State<AppState>) -> Result<Json<Vec<TestBody>>, ApiError> {
    let tests = state.store.list_tests()?;
    Ok(Json(tests.into_iter().map(TestBody::from).collect()))
}

async fn get_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Json<TestBody>, ApiError> {
    let test = state
        .store
        .get_test(test_id)?
        .ok_or_else(|| ApiError::NotFound(format!("no test found with id {}", test_id)))?;
    Ok(Json(test.into()))
}

async fn update_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
    Json(body): Json<UpdateTestBody>,
) -> Result<Json<Value>, ApiError> {
    tracing::debug!(test_id, "updating test via api");
    let existing = state
        .store
        .get_test(test_id)?
        .ok_or_else(|| ApiError::NotFound(format!("no test found with id {}", test_id)))?;

    // The API edits the record fields only; tags are the UI's business.
    state.store.save_test(
        Some(test_id),
        &body.user,
        &body.name,
        &body.steps,
        &existing.tags,
    )?;
    Ok(Json(json!({})))
}

async fn delete_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    tracing::debug!(test_id, "deleting test via api");
    if !state.store.delete_test(test_id)? {
        return Err(ApiError::NotFound(format!("no test found with id {}", test_id)));
    }
    Ok(Json(json!({})))
}

/// Create a run in status `new` for the external runner to pick up.
async fn start_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
    body: Option<Json<StartBody>>,
) -> Result<Json<RunBody>, ApiError> {
    tracing::info!(test_id, "starting test run");
    let test = state
        .store
        .get_test(test_id)?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown test id: {}", test_id)))?;

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let planned = plan_run(&test, body.user.as_deref(), body.examples.as_ref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let run = state
        .store
        .create_run(test.id, &planned.user, &planned.example_text)?;
    tracing::debug!(run_id = run.id, "created test run");
    Ok(Json(run.into()))
}

/// Edit-history snapshots, oldest first.
async fn list_history(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_test(test_id)?.is_none() {
        return Err(ApiError::NotFound(format!("no test found with id {}", test_id)));
    }
    let history = state.store.history_for_test(test_id)?;
    Ok(Json(json!({ "history": history })))
}

async fn list_runs(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Json<Vec<RunBody>>, ApiError> {
    let runs = state.store.runs_for_test(test_id)?;
    Ok(Json(runs.into_iter().map(RunBody::from).collect()))
}

async fn get_run(
    State(state): State<AppState>,
    Path((test_id, run_id)): Path<(i64, i64)>,
) -> Result<Json<RunBody>, ApiError> {
    let run = run_of_test(&state, test_id, run_id)?;
    Ok(Json(run.into()))
}

async fn list_steps(
    State(state): State<AppState>,
    Path((test_id, run_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let run = run_of_test(&state, test_id, run_id)?;
    let steps = state.store.steps_for_run_by_num(run.id)?;
    let steps: Vec<StepBody> = steps
        .into_iter()
        .map(|s| StepBody::new(s, &state))
        .collect();
    Ok(Json(json!({ "steps": steps })))
}

fn run_of_test(state: &AppState, test_id: i64, run_id: i64) -> Result<TestRun, ApiError> {
    let run = state
        .store
        .get_run(run_id)?
        .filter(|run| run.test_id == test_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("no run found with id {} for test {}", run_id, test_id))
        })?;
    Ok(run)
}
