//! Scenario-outline support: `<variable>` extraction and synthesis of the
//! pipe-delimited example table from client-supplied rows.

use std::collections::BTreeSet;

use regex_lite::Regex;
use serde_json::Value;
use thiserror::Error;

/// Marker for an inline example table inside the step text. When present,
/// the author supplied concrete rows already and no synthesis is needed.
const INLINE_EXAMPLES_MARKER: &str = "Examples:";

/// Extract the distinct `<name>` placeholders from scenario-outline step
/// text. A name is any run of characters that is not an angle bracket,
/// newline, or carriage return.
pub fn step_variables(steps: &str) -> BTreeSet<String> {
    static VARIABLE_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = VARIABLE_RE.get_or_init(|| Regex::new(r"<([^<>\r\n]+)>").unwrap());
    re.captures_iter(steps)
        .map(|c| c[1].to_string())
        .collect()
}

pub fn has_inline_examples(steps: &str) -> bool {
    steps.contains(INLINE_EXAMPLES_MARKER)
}

#[derive(Debug, Error, PartialEq)]
pub enum ExampleError {
    #[error("examples payload was not an array")]
    NotAnArray,
    #[error("examples array was empty")]
    Empty,
    #[error("an example object was missing some fields: {}", missing.join(", "))]
    MissingFields { missing: Vec<String> },
}

/// Build the Gherkin example table (sans the `Examples:` line, which the
/// runner adds) from the outline's variables and an array of row objects.
///
/// The header lists the variables in the set's iteration order and every
/// data row reuses that same order, so columns always line up within one
/// invocation. Nothing is produced on any error: a row missing fields
/// fails the whole payload and names the exact missing subset.
pub fn build_example_text(
    variables: &BTreeSet<String>,
    examples: &Value,
) -> Result<String, ExampleError> {
    let rows = examples.as_array().ok_or(ExampleError::NotAnArray)?;
    if rows.is_empty() {
        return Err(ExampleError::Empty);
    }

    let header: Vec<&str> = variables.iter().map(String::as_str).collect();
    let mut lines = vec![format!("|{}|", header.join("|"))];

    for row in rows {
        // a row that is not an object is missing every field
        let Some(obj) = row.as_object() else {
            return Err(ExampleError::MissingFields {
                missing: variables.iter().cloned().collect(),
            });
        };
        let missing: Vec<String> = variables
            .iter()
            .filter(|v| !obj.contains_key(*v))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ExampleError::MissingFields { missing });
        }

        let values: Vec<String> = variables
            .iter()
            .map(|v| match &obj[v] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        lines.push(format!("|{}|", values.join("|")));
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_distinct_variables() {
        let steps = "Given a <user> with <password>\nWhen <user> logs in";
        assert_eq!(step_variables(steps), vars(&["user", "password"]));
    }

    #[test]
    fn ignores_brackets_spanning_lines() {
        assert!(step_variables("a < broken\n> token").is_empty());
        assert!(step_variables("no variables here").is_empty());
    }

    #[test]
    fn detects_inline_examples() {
        assert!(has_inline_examples("Given <x>\nExamples:\n|x|\n|1|"));
        assert!(!has_inline_examples("Given <x>"));
    }

    #[test]
    fn table_has_header_plus_one_line_per_row() {
        let text = build_example_text(
            &vars(&["user", "password"]),
            &json!([
                {"user": "alice", "password": "pw1"},
                {"user": "bob", "password": "pw2"},
            ]),
        )
        .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "|password|user|");
        assert_eq!(lines[1], "|pw1|alice|");
        assert_eq!(lines[2], "|pw2|bob|");
    }

    #[test]
    fn non_string_values_are_rendered() {
        let text = build_example_text(
            &vars(&["count"]),
            &json!([{"count": 3}]),
        )
        .unwrap();
        assert_eq!(text, "|count|\n|3|");
    }

    #[test]
    fn extra_row_fields_are_ignored() {
        let text = build_example_text(
            &vars(&["a"]),
            &json!([{"a": "1", "unrelated": "x"}]),
        )
        .unwrap();
        assert_eq!(text, "|a|\n|1|");
    }

    #[test]
    fn missing_fields_are_reported_exactly() {
        let err = build_example_text(
            &vars(&["a", "b", "c"]),
            &json!([{"b": "1"}]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExampleError::MissingFields {
                missing: vec!["a".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn first_bad_row_aborts_everything() {
        let err = build_example_text(
            &vars(&["a"]),
            &json!([{"a": "ok"}, {"wrong": "field"}]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExampleError::MissingFields {
                missing: vec!["a".to_string()]
            }
        );
    }

    #[test]
    fn non_object_row_is_missing_every_field() {
        let err = build_example_text(&vars(&["a"]), &json!(["not-an-object"])).unwrap_err();
        assert_eq!(
            err,
            ExampleError::MissingFields {
                missing: vec!["a".to_string()]
            }
        );
    }

    #[test]
    fn rejects_non_array_and_empty_payloads() {
        assert_eq!(
            build_example_text(&vars(&["a"]), &json!({"a": 1})).unwrap_err(),
            ExampleError::NotAnArray
        );
        assert_eq!(
            build_example_text(&vars(&["a"]), &json!([])).unwrap_err(),
            ExampleError::Empty
        );
    }
}
