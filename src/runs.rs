//! Validation rules for starting a test run, shared by the API and the UI.

use serde_json::Value;
use thiserror::Error;

use crate::model::Test;
use crate::outline::{self, ExampleError};

#[derive(Debug, Error, PartialEq)]
pub enum StartError {
    #[error("user not specified")]
    MissingUser,
    #[error(transparent)]
    BadExamples(#[from] ExampleError),
    #[error(
        "a test run for a scenario outline was requested without an example \
         being provided in the request body or the step text"
    )]
    OutlineNeedsExamples,
}

/// A validated request to create a run.
#[derive(Debug, PartialEq)]
pub struct RunRequest {
    pub user: String,
    pub example_text: String,
}

/// Check a start request against the test's steps. An outline (steps with
/// `<variable>` placeholders) must get its rows from either an inline
/// `Examples:` section or the request payload; everything else runs with
/// empty example text.
pub fn plan_run(
    test: &Test,
    user: Option<&str>,
    examples: Option<&Value>,
) -> Result<RunRequest, StartError> {
    let variables = outline::step_variables(&test.steps);

    let user = user.ok_or(StartError::MissingUser)?;

    let example_text = match examples {
        Some(examples) => outline::build_example_text(&variables, examples)?,
        None => String::new(),
    };

    if !variables.is_empty()
        && example_text.is_empty()
        && !outline::has_inline_examples(&test.steps)
    {
        return Err(StartError::OutlineNeedsExamples);
    }

    Ok(RunRequest {
        user: user.to_string(),
        example_text,
    })
}
