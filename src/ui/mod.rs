//! Server-rendered HTML UI: scenario list/search, the edit form, run
//! detail pages, and the queue view.

use std::collections::{BTreeMap, BTreeSet};

use askama::Template;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::state::AppState;
use crate::model::{self, Status, Test, TestRun};
use crate::outline;
use crate::queue;
use crate::richtext;
use crate::runs::{plan_run, StartError};

const PAGE_SIZE: usize = 20;

/// Bootstrap-ish label colors cycled across the tag cloud.
const LABEL_CLASSES: [&str; 6] = [
    "label-default",
    "label-primary",
    "label-success",
    "label-warning",
    "label-danger",
    "label-info",
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tests", get(tests_page))
        .route("/tests/new", get(new_test_page).post(save_new_test))
        .route("/tests/{test_id}/edit", get(edit_test_page).post(save_edited_test))
        .route("/tests/{test_id}/start", get(start_test))
        .route("/tests/{test_id}/outline-form", get(outline_form_page))
        .route("/tests/{test_id}/start-outline", axum::routing::post(start_outline_test))
        .route("/tests/{test_id}/delete", get(delete_test))
        .route("/tests/runs", get(all_runs_page))
        .route("/tests/runs/{run_id}", get(run_by_id_page))
        .route("/tests/{test_id}/runs", get(test_runs_page))
        .route("/tests/{test_id}/runs/{run_id}", get(run_detail_page))
        .route("/tests/queue", get(queue_page))
}

/// The authenticated identity, taken once per request from the
/// `X-Remote-User` header the fronting proxy sets. Falls back to "nobody"
/// with an error log, matching the taxonomy for absent identity.
pub struct RemoteUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for RemoteUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get("x-remote-user")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|u| !u.is_empty());
        match user {
            Some(user) => Ok(Self(user.to_string())),
            None => {
                tracing::error!("user not detected through X-Remote-User header");
                Ok(Self("nobody".to_string()))
            }
        }
    }
}

/// Internal failures render as a bare 500; everything user-facing is
/// handled before this.
struct UiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for UiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for UiError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self.0, "internal error serving ui request");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

fn render<T: Template>(template: T) -> Result<Response, UiError> {
    Ok(Html(template.render()?).into_response())
}

// ----------------------------------------------------------------------
// Scenario list
// ----------------------------------------------------------------------

struct TagView {
    name: String,
    css: &'static str,
    toggle_url: String,
}

struct TestView {
    id: i64,
    name: String,
    user: String,
    tags: Vec<TagView>,
}

#[derive(Template)]
#[template(path = "tests.html")]
struct TestsTemplate {
    title: &'static str,
    tests: Vec<TestView>,
    tag_list: Vec<TagView>,
    searched_tags: Vec<String>,
    page: usize,
    page_count: usize,
    prev_url: Option<String>,
    next_url: Option<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    tag: Option<String>,
    page: Option<usize>,
}

/// Percent-encode the `tag` query value: tags joined with a literal `+`,
/// then the whole value encoded so tags containing `&`, `%`, spaces, or
/// the separator itself survive the round trip.
fn tag_query_value(searched: &[String]) -> String {
    urlencoding::encode(&searched.join("+")).into_owned()
}

/// Toggle `tag` in the search set and format the resulting list URL.
fn toggle_tag_url(searched: &[String], tag: &str) -> String {
    let mut values: Vec<String> = searched.to_vec();
    match values.iter().position(|v| v == tag) {
        Some(idx) => {
            values.remove(idx);
        }
        None => values.push(tag.to_string()),
    }
    if values.is_empty() {
        "/tests".to_string()
    } else {
        format!("/tests?tag={}", tag_query_value(&values))
    }
}

fn tag_views(names: &[String], searched: &[String]) -> Vec<TagView> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| TagView {
            name: name.clone(),
            css: LABEL_CLASSES[i % LABEL_CLASSES.len()],
            toggle_url: toggle_tag_url(searched, name),
        })
        .collect()
}

async fn tests_page(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, UiError> {
    let searched: Vec<String> = query
        .tag
        .as_deref()
        .map(|raw| {
            raw.split('+')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let tests = if searched.is_empty() {
        // newest first when browsing everything
        state.store.list_tests()?
    } else {
        tracing::debug!(tags = ?searched, "displaying tests for search tags");
        // broad OR query first, then keep only supersets of the search set
        let candidates = state.store.list_tests_with_any_tag(&searched)?;
        let required: BTreeSet<String> = searched.iter().cloned().collect();
        model::filter_tags(candidates, &required)
    };

    let page_count = tests.len().div_ceil(PAGE_SIZE).max(1);
    // out-of-range pages clamp to the nearest valid page
    let page = query.page.unwrap_or(1).clamp(1, page_count);
    let page_tests: Vec<TestView> = tests
        .into_iter()
        .skip((page - 1) * PAGE_SIZE)
        .take(PAGE_SIZE)
        .map(|t| TestView {
            id: t.id,
            name: t.name,
            user: t.user,
            tags: tag_views(&t.tags, &searched),
        })
        .collect();

    let tag_list = tag_views(&state.store.all_tags()?, &searched);

    // page links keep the active tag filter
    let page_url = |n: usize| {
        if searched.is_empty() {
            format!("/tests?page={n}")
        } else {
            format!("/tests?tag={}&page={n}", tag_query_value(&searched))
        }
    };
    let prev_url = (page > 1).then(|| page_url(page - 1));
    let next_url = (page < page_count).then(|| page_url(page + 1));

    render(TestsTemplate {
        title: "Scenarios",
        tests: page_tests,
        tag_list,
        searched_tags: searched,
        page,
        page_count,
        prev_url,
        next_url,
    })
}

// ----------------------------------------------------------------------
// Create / edit form
// ----------------------------------------------------------------------

#[derive(Template)]
#[template(path = "form.html")]
struct FormTemplate {
    title: &'static str,
    action: String,
    name: String,
    steps_rich: String,
    tags_csv: String,
}

#[derive(Deserialize)]
struct TestForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    steps: String,
    #[serde(default)]
    tags: String,
}

async fn new_test_page() -> Result<Response, UiError> {
    render(FormTemplate {
        title: "Create Scenario",
        action: "/tests/new".to_string(),
        name: String::new(),
        steps_rich: richtext::steps_to_rich(""),
        tags_csv: String::new(),
    })
}

async fn edit_test_page(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Response, UiError> {
    let Some(test) = state.store.get_test(test_id)? else {
        return Ok(Redirect::to("/tests").into_response());
    };
    render(FormTemplate {
        title: "Edit Scenario",
        action: format!("/tests/{}/edit", test.id),
        name: test.name,
        // the editor works on rich text; plain steps stay in the database
        steps_rich: richtext::steps_to_rich(&test.steps),
        tags_csv: test.tags.join(", "),
    })
}

fn save_test(
    state: &AppState,
    id: Option<i64>,
    user: &str,
    form: &TestForm,
) -> Result<(), UiError> {
    tracing::debug!(%user, ?id, "saving test from form");
    let steps = richtext::rich_to_steps(&form.steps);
    let tags: Vec<String> = form
        .tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    state.store.save_test(id, user, &form.name, &steps, &tags)?;
    Ok(())
}

async fn save_new_test(
    State(state): State<AppState>,
    RemoteUser(user): RemoteUser,
    Form(form): Form<TestForm>,
) -> Result<Response, UiError> {
    save_test(&state, None, &user, &form)?;
    Ok(Redirect::to("/tests").into_response())
}

async fn save_edited_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
    RemoteUser(user): RemoteUser,
    Form(form): Form<TestForm>,
) -> Result<Response, UiError> {
    if state.store.get_test(test_id)?.is_none() {
        return Ok(Redirect::to("/tests").into_response());
    }
    save_test(&state, Some(test_id), &user, &form)?;
    Ok(Redirect::to("/tests").into_response())
}

async fn delete_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Response, UiError> {
    tracing::info!(test_id, "deleting test");
    if !state.store.delete_test(test_id)? {
        tracing::error!(test_id, "unable to delete test");
    }
    Ok(Redirect::to("/tests").into_response())
}

// ----------------------------------------------------------------------
// Starting runs
// ----------------------------------------------------------------------

async fn start_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
    RemoteUser(user): RemoteUser,
) -> Result<Response, UiError> {
    tracing::info!(test_id, %user, "run test");
    let Some(test) = state.store.get_test(test_id)? else {
        return Ok(Redirect::to("/tests").into_response());
    };

    match plan_run(&test, Some(&user), None) {
        Ok(planned) => {
            let run = state
                .store
                .create_run(test.id, &planned.user, &planned.example_text)?;
            Ok(Redirect::to(&format!("/tests/{}/runs/{}", test.id, run.id)).into_response())
        }
        Err(StartError::OutlineNeedsExamples) => {
            // the outline form collects the example row first
            Ok(Redirect::to(&format!("/tests/{}/outline-form", test.id)).into_response())
        }
        Err(err) => {
            tracing::error!(test_id, error = %err, "unable to run test");
            Ok(Redirect::to(&format!("/tests/{}/runs", test.id)).into_response())
        }
    }
}

#[derive(Template)]
#[template(path = "outline_form.html")]
struct OutlineFormTemplate {
    title: &'static str,
    test_id: i64,
    test_name: String,
    variables: Vec<String>,
    error_text: Option<String>,
}

/// Per-variable input form for outlines without an inline example table.
/// Lets users treat an outline as a template for one-off runs instead of
/// editing the scenario itself.
async fn outline_form_page(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Response, UiError> {
    let Some(test) = state.store.get_test(test_id)? else {
        return Ok(Redirect::to("/tests").into_response());
    };

    let variables = outline::step_variables(&test.steps);
    if variables.is_empty() || outline::has_inline_examples(&test.steps) {
        // nothing to collect, run it directly
        return Ok(Redirect::to(&format!("/tests/{}/start", test.id)).into_response());
    }

    render(OutlineFormTemplate {
        title: "Run Scenario Outline",
        test_id: test.id,
        test_name: test.name,
        variables: variables.into_iter().collect(),
        error_text: None,
    })
}

async fn start_outline_test(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
    RemoteUser(user): RemoteUser,
    Form(values): Form<BTreeMap<String, String>>,
) -> Result<Response, UiError> {
    tracing::info!(test_id, %user, "run scenario outline test");
    let Some(test) = state.store.get_test(test_id)? else {
        return Ok(Redirect::to("/tests").into_response());
    };

    // one example row, fields named after the variables themselves
    let row: Value = Value::Object(
        values
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    );
    match plan_run(&test, Some(&user), Some(&json!([row]))) {
        Ok(planned) => {
            let run = state
                .store
                .create_run(test.id, &planned.user, &planned.example_text)?;
            Ok(Redirect::to(&format!("/tests/{}/runs/{}", test.id, run.id)).into_response())
        }
        Err(err) => {
            tracing::error!(test_id, error = %err, "cannot start outline test");
            let variables = outline::step_variables(&test.steps);
            render(OutlineFormTemplate {
                title: "Run Scenario Outline",
                test_id: test.id,
                test_name: test.name,
                variables: variables.into_iter().collect(),
                error_text: Some(err.to_string()),
            })
        }
    }
}

// ----------------------------------------------------------------------
// Run listings and detail
// ----------------------------------------------------------------------

struct RunRowView {
    id: i64,
    test_id: i64,
    user: String,
    timestamp: String,
    status: &'static str,
    duration: String,
}

impl RunRowView {
    fn new(run: &TestRun) -> Self {
        Self {
            id: run.id,
            test_id: run.test_id,
            user: run.user.clone(),
            timestamp: run.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            status: run.status.as_str(),
            duration: crate::notify::format_duration(run.duration),
        }
    }
}

struct StepView {
    text: String,
    status: &'static str,
    css: &'static str,
    duration: String,
    /// Non-zero when the step has a screenshot; anchors the thumbnail.
    pair_id: usize,
}

struct StepSetView {
    row_num: i64,
    steps: Vec<StepView>,
}

struct ScreenshotView {
    url: String,
    pair_id: usize,
}

struct RunDetailView {
    test_id: i64,
    test_name: String,
    run_id: i64,
    status: &'static str,
    status_css: &'static str,
    queue_position: Option<String>,
    report_lines: Vec<String>,
    step_sets: Vec<StepSetView>,
    screenshots: Vec<ScreenshotView>,
}

#[derive(Template)]
#[template(path = "runs.html")]
struct RunsTemplate {
    title: &'static str,
    detail: Option<RunDetailView>,
    runs: Vec<RunRowView>,
    error_text: Option<String>,
}

fn run_status_class(status: Status) -> &'static str {
    match status {
        Status::New | Status::Running => "alert-info",
        Status::Passed => "alert-success",
        Status::Skipped => "alert-warning",
        Status::Failed | Status::Error => "alert-danger",
    }
}

fn step_status_class(status: Status) -> &'static str {
    match status {
        Status::New => "text-muted",
        Status::Running => "text-info",
        Status::Passed => "text-success",
        Status::Skipped => "text-warning",
        Status::Failed | Status::Error => "text-danger",
    }
}

fn run_detail(state: &AppState, test: &Test, run: &TestRun) -> Result<RunDetailView, UiError> {
    // group steps by example row for display; pair ids tie a step to its
    // screenshot thumbnail
    let mut step_sets: BTreeMap<i64, Vec<StepView>> = BTreeMap::new();
    let mut screenshots = Vec::new();
    let mut screen_idx = 0usize;

    for step in state.store.steps_for_run(run.id)? {
        let mut pair_id = 0;
        if !step.screenshot_key.is_empty() {
            screen_idx += 1;
            pair_id = screen_idx;
            screenshots.push(ScreenshotView {
                url: state.signer.url_for(&step.screenshot_key),
                pair_id,
            });
        }
        step_sets.entry(step.example_row_num).or_default().push(StepView {
            text: step.text,
            status: step.status.as_str(),
            css: step_status_class(step.status),
            duration: crate::notify::format_duration(step.duration),
            pair_id,
        });
    }

    // the position is not persisted anywhere; recompute on every view
    let queue_position = if run.status == Status::New {
        let ahead = state.store.count_runs_ahead(run)?;
        Some(queue::position_label(ahead))
    } else {
        None
    };

    let report_lines = if run.text.is_empty() {
        Vec::new()
    } else {
        run.text.lines().map(String::from).collect()
    };

    Ok(RunDetailView {
        test_id: test.id,
        test_name: test.name.clone(),
        run_id: run.id,
        status: run.status.as_str(),
        status_css: run_status_class(run.status),
        queue_position,
        report_lines,
        step_sets: step_sets
            .into_iter()
            .map(|(row_num, steps)| StepSetView { row_num, steps })
            .collect(),
        screenshots,
    })
}

async fn all_runs_page(State(state): State<AppState>) -> Result<Response, UiError> {
    let runs = state.store.all_runs()?;
    render(RunsTemplate {
        title: "Test Runs",
        detail: None,
        runs: runs.iter().map(RunRowView::new).collect(),
        error_text: None,
    })
}

async fn run_by_id_page(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Response, UiError> {
    let Some(run) = state.store.get_run(run_id)? else {
        return Ok(Redirect::to("/tests/runs").into_response());
    };
    let Some(test) = state.store.get_test(run.test_id)? else {
        return Ok(Redirect::to("/tests/runs").into_response());
    };
    let runs = state.store.runs_for_test(test.id)?;
    let detail = run_detail(&state, &test, &run)?;
    render(RunsTemplate {
        title: "Test Runs",
        detail: Some(detail),
        runs: runs.iter().map(RunRowView::new).collect(),
        error_text: None,
    })
}

async fn test_runs_page(
    State(state): State<AppState>,
    Path(test_id): Path<i64>,
) -> Result<Response, UiError> {
    let Some(test) = state.store.get_test(test_id)? else {
        return Ok(Redirect::to("/tests").into_response());
    };
    let runs = state.store.runs_for_test(test.id)?;

    let (detail, error_text) = match state.store.latest_run_for_test(test.id)? {
        Some(run) => (Some(run_detail(&state, &test, &run)?), None),
        None => {
            tracing::error!(test_id, "could not find the latest run for test");
            (
                None,
                Some(format!("Unable to find latest run for test {}", test.id)),
            )
        }
    };
    render(RunsTemplate {
        title: "Test Runs",
        detail,
        runs: runs.iter().map(RunRowView::new).collect(),
        error_text,
    })
}

async fn run_detail_page(
    State(state): State<AppState>,
    Path((test_id, run_id)): Path<(i64, i64)>,
) -> Result<Response, UiError> {
    let Some(test) = state.store.get_test(test_id)? else {
        return Ok(Redirect::to("/tests").into_response());
    };
    let run = state
        .store
        .get_run(run_id)?
        .filter(|run| run.test_id == test.id);
    let Some(run) = run else {
        return Ok(Redirect::to(&format!("/tests/{}/runs", test.id)).into_response());
    };
    let runs = state.store.runs_for_test(test.id)?;
    let detail = run_detail(&state, &test, &run)?;
    render(RunsTemplate {
        title: "Test Runs",
        detail: Some(detail),
        runs: runs.iter().map(RunRowView::new).collect(),
        error_text: None,
    })
}

// ----------------------------------------------------------------------
// Queue
// ----------------------------------------------------------------------

#[derive(Template)]
#[template(path = "queue.html")]
struct QueueTemplate {
    title: &'static str,
    summary_text: String,
    runs: Vec<RunRowView>,
    current_user: String,
}

async fn queue_page(
    State(state): State<AppState>,
    RemoteUser(current_user): RemoteUser,
) -> Result<Response, UiError> {
    let pending = state.store.pending_runs()?;
    render(QueueTemplate {
        title: "Test Queue",
        summary_text: queue::summary_text(pending.len()),
        runs: pending.iter().map(RunRowView::new).collect(),
        current_user,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_url_adds_and_removes_tags() {
        let searched = vec!["smoke".to_string()];
        assert_eq!(toggle_tag_url(&searched, "login"), "/tests?tag=smoke%2Blogin");
        assert_eq!(toggle_tag_url(&searched, "smoke"), "/tests");
        assert_eq!(toggle_tag_url(&[], "smoke"), "/tests?tag=smoke");
    }

    #[test]
    fn tag_urls_encode_reserved_characters() {
        let searched = vec!["a b".to_string()];
        assert_eq!(toggle_tag_url(&searched, "c&d"), "/tests?tag=a%20b%2Bc%26d");
        // the encoded separator decodes back to '+' for splitting
        assert_eq!(tag_query_value(&searched), "a%20b");
    }

    #[test]
    fn status_css_classes() {
        assert_eq!(run_status_class(Status::New), "alert-info");
        assert_eq!(run_status_class(Status::Failed), "alert-danger");
        assert_eq!(step_status_class(Status::Passed), "text-success");
        assert_eq!(step_status_class(Status::Error), "text-danger");
    }
}
