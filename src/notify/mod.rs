//! Result email notifications for completed runs.
//!
//! Builds the subject, a plain-text body, and an HTML body with a
//! status-colored swatch, then dispatches exactly one multi-part email
//! per invocation. Recipient problems and transport failures are logged
//! and metered, never propagated: the caller gets `Ok` either way.

pub mod mailer;

use anyhow::Result;
use serde_json::json;

use crate::config::EmailConfig;
use crate::metrics::{Metrics, METRIC_EMAIL_RESULTS_FAILURE, METRIC_EMAIL_RESULTS_SENT};
use crate::model::{Status, TestRun, TestRunStep};
use crate::storage::Store;
use mailer::{Mailer, OutboundEmail};

/// Swatch color for a final status: green for passed, red for failed,
/// white for everything else.
pub fn status_color(status: Status) -> &'static str {
    match status {
        Status::Passed => "#00ff00",
        Status::Failed => "#ff0000",
        _ => "#ffffff",
    }
}

/// Two decimal places with trailing fractional zeros (and a bare decimal
/// point) trimmed: 2.50 -> "2.5", 3.00 -> "3".
pub fn format_duration(seconds: f64) -> String {
    let formatted = format!("{:.2}", seconds);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

const TEXT_EMAIL: &str = "\
BDD Test Results

{test_name}

Your test run completed in {test_duration} seconds:

{results}

You can view these results in more detail at: {url}

Thanks for using BDD!
";

const HTML_EMAIL: &str = "\
<html>
    <head></head>
    <body>
        <h1>BDD Results</h1>
        <h2>{test_name} <span style=\"background-color: {status_color}\">[{test_status}]</span></h2>
        <h3>Your test run completed in {test_duration} seconds:</h3>
        <p>
            {results}
        </p>
        <p>You can view these results in more detail at: {url}</p>
        <p>Thanks for using BDD!</p>
    </body>
</html>
";

/// Formats and dispatches result emails.
pub struct Notifier {
    store: Store,
    metrics: Metrics,
    mailer: Box<dyn Mailer>,
    email: EmailConfig,
    root_url: String,
}

impl Notifier {
    pub fn new(
        store: Store,
        metrics: Metrics,
        mailer: Box<dyn Mailer>,
        email: EmailConfig,
        root_url: &str,
    ) -> Self {
        Self {
            store,
            metrics,
            mailer,
            email,
            root_url: root_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send the result email for a run. Storage problems (unknown run or
    /// test) are errors; an absent recipient or a transport failure is
    /// swallowed after logging a failure metric.
    pub async fn notify(&self, run_id: i64) -> Result<()> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| anyhow::anyhow!("no run found with id {}", run_id))?;
        let test = self
            .store
            .get_test(run.test_id)?
            .ok_or_else(|| anyhow::anyhow!("no test found with id {}", run.test_id))?;

        let Some(recipient) = self.resolve_recipient(&run) else {
            tracing::error!(run_id, "run has no user, can't send a result email");
            self.count(METRIC_EMAIL_RESULTS_FAILURE, None);
            return Ok(());
        };

        let steps = self.store.steps_for_run_by_num(run.id)?;
        let url = format!("{}/tests/{}/runs/{}", self.root_url, test.id, run.id);
        let duration = format_duration(run.duration);

        let subject = format!("[BDD] Test Results for {} [{}]", test.name, run.status);
        let text_body = TEXT_EMAIL
            .replace("{test_name}", &test.name)
            .replace("{test_duration}", &duration)
            .replace("{results}", &text_results(&steps))
            .replace("{url}", &url);
        let html_body = HTML_EMAIL
            .replace("{test_name}", &test.name)
            .replace("{status_color}", status_color(run.status))
            .replace("{test_status}", run.status.as_str())
            .replace("{test_duration}", &duration)
            .replace("{results}", &html_results(&steps))
            .replace("{url}", &url);

        let email = OutboundEmail {
            sender: self.email.sender.clone(),
            to: recipient.clone(),
            subject,
            text_body,
            html_body,
        };

        tracing::debug!(run_id, %recipient, "sending result email");
        match self.mailer.send(&email).await {
            Ok(()) => {
                self.count(METRIC_EMAIL_RESULTS_SENT, Some(json!({"email": recipient})));
            }
            Err(err) => {
                tracing::error!(run_id, %recipient, error = %err, "failed to send result email");
                self.count(METRIC_EMAIL_RESULTS_FAILURE, Some(json!({"email": recipient})));
            }
        }
        Ok(())
    }

    /// The run's user, with the configured domain appended when missing.
    /// An empty user resolves to nothing at all.
    fn resolve_recipient(&self, run: &TestRun) -> Option<String> {
        if run.user.is_empty() {
            return None;
        }
        let mut recipient = run.user.clone();
        if !recipient.contains(&self.email.domain) {
            recipient.push_str(&self.email.domain);
        }
        Some(recipient)
    }

    fn count(&self, name: &str, dimensions: Option<serde_json::Value>) {
        if let Err(err) = self.metrics.count(name, dimensions.as_ref()) {
            tracing::error!(metric = name, error = %err, "failed to record metric");
        }
    }
}

fn text_results(steps: &[TestRunStep]) -> String {
    let mut out = String::from("Step Results\n------------\n");
    for step in steps {
        out.push_str(&format!("* {} [{}]\n", step.text, step.status));
    }
    out
}

fn html_results(steps: &[TestRunStep]) -> String {
    let mut out = String::from("<ul>");
    for step in steps {
        out.push_str(&format!(
            "<li>{} <span style=\"background-color:{}\">[{}]</span></li>",
            step.text,
            status_color(step.status),
            step.status
        ));
    }
    out.push_str("</ul>\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{test_pool, Store};
    use std::sync::{Arc, Mutex};

    struct RecordingMailer {
        sent: Arc<Mutex<Vec<OutboundEmail>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<()> {
            if self.fail {
                anyhow::bail!("relay down");
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn notifier_with(
        store: Store,
        metrics: Metrics,
        fail: bool,
    ) -> (Notifier, Arc<Mutex<Vec<OutboundEmail>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mailer = RecordingMailer {
            sent: sent.clone(),
            fail,
        };
        let notifier = Notifier::new(
            store,
            metrics,
            Box::new(mailer),
            EmailConfig {
                domain: "@corp.example".to_string(),
                sender: "bdd@corp.example".to_string(),
                endpoint: String::new(),
            },
            "https://bdd.corp.example/",
        );
        (notifier, sent)
    }

    fn seeded_run(store: &Store, user: &str) -> i64 {
        let test = store
            .save_test(None, "author", "login flow", "Given a user", &[])
            .unwrap();
        let run = store.create_run(test.id, user, "").unwrap();
        store
            .record_step(run.id, 1, 1, "Given a user", Status::Passed, None, None, 0.5, "")
            .unwrap();
        store
            .record_step(run.id, 2, 1, "When they log in", Status::Failed, None, None, 1.0, "")
            .unwrap();
        store.finish_run(run.id, Status::Failed, "boom", 2.5).unwrap();
        run.id
    }

    #[tokio::test]
    async fn empty_user_sends_nothing_and_meters_one_failure() {
        let pool = test_pool();
        let store = Store::new(pool.clone());
        let metrics = Metrics::new(pool);
        let run_id = seeded_run(&store, "");

        let (notifier, sent) = notifier_with(store, metrics.clone(), false);
        notifier.notify(run_id).await.unwrap();

        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(metrics.total(METRIC_EMAIL_RESULTS_FAILURE).unwrap(), 1.0);
        assert_eq!(metrics.total(METRIC_EMAIL_RESULTS_SENT).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn domain_is_appended_when_missing() {
        let pool = test_pool();
        let store = Store::new(pool.clone());
        let metrics = Metrics::new(pool);
        let run_id = seeded_run(&store, "alice");

        let (notifier, sent) = notifier_with(store, metrics.clone(), false);
        notifier.notify(run_id).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@corp.example");
        assert_eq!(metrics.total(METRIC_EMAIL_RESULTS_SENT).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn full_address_is_left_alone() {
        let pool = test_pool();
        let store = Store::new(pool.clone());
        let metrics = Metrics::new(pool.clone());
        let run_id = seeded_run(&store, "bob@corp.example");

        let (notifier, sent) = notifier_with(store, metrics, false);
        notifier.notify(run_id).await.unwrap();

        assert_eq!(sent.lock().unwrap()[0].to, "bob@corp.example");
    }

    #[tokio::test]
    async fn bodies_carry_steps_status_color_and_deep_link() {
        let pool = test_pool();
        let store = Store::new(pool.clone());
        let metrics = Metrics::new(pool);
        let run_id = seeded_run(&store, "alice");

        let (notifier, sent) = notifier_with(store, metrics, false);
        notifier.notify(run_id).await.unwrap();

        let sent = sent.lock().unwrap();
        let email = &sent[0];
        assert_eq!(email.subject, "[BDD] Test Results for login flow [failed]");
        assert!(email.text_body.contains("* Given a user [passed]"));
        assert!(email.text_body.contains("* When they log in [failed]"));
        assert!(email.text_body.contains("completed in 2.5 seconds"));
        assert!(email.html_body.contains("background-color: #ff0000"));
        assert!(email.html_body.contains("background-color:#00ff00"));
        assert!(email
            .text_body
            .contains("https://bdd.corp.example/tests/1/runs/1"));
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed_but_metered() {
        let pool = test_pool();
        let store = Store::new(pool.clone());
        let metrics = Metrics::new(pool);
        let run_id = seeded_run(&store, "alice");

        let (notifier, sent) = notifier_with(store, metrics.clone(), true);
        notifier.notify(run_id).await.unwrap();

        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(metrics.total(METRIC_EMAIL_RESULTS_FAILURE).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unknown_run_is_an_error() {
        let pool = test_pool();
        let store = Store::new(pool.clone());
        let metrics = Metrics::new(pool);
        let (notifier, _) = notifier_with(store, metrics, false);
        assert!(notifier.notify(404).await.is_err());
    }

    #[test]
    fn duration_formatting_trims_fractional_zeros() {
        assert_eq!(format_duration(2.5), "2.5");
        assert_eq!(format_duration(2.50), "2.5");
        assert_eq!(format_duration(3.0), "3");
        assert_eq!(format_duration(0.0), "0");
        assert_eq!(format_duration(10.0), "10");
        assert_eq!(format_duration(1.234), "1.23");
    }

    #[test]
    fn status_colors() {
        assert_eq!(status_color(Status::Passed), "#00ff00");
        assert_eq!(status_color(Status::Failed), "#ff0000");
        assert_eq!(status_color(Status::New), "#ffffff");
        assert_eq!(status_color(Status::Skipped), "#ffffff");
    }
}
