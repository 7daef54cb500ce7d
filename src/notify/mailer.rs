//! Outbound mail transport.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

/// A fully formatted multi-part message ready for dispatch.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub sender: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Seam between the notification formatter and the actual transport.
/// Production uses [`HttpMailer`]; tests substitute a recording fake.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

/// Posts messages to an HTTP mail relay. Delivery beyond the relay is not
/// this crate's concern; a non-2xx response is surfaced as an error and
/// never retried.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "from": email.sender,
                "to": [email.to],
                "subject": email.subject,
                "text": email.text_body,
                "html": email.html_body,
            }))
            .send()
            .await
            .context("failed to reach mail relay")?;

        response
            .error_for_status()
            .context("mail relay rejected the message")?;
        Ok(())
    }
}
