//! Email dispatch capability.
//!
//! The gateway never speaks SMTP itself; it hands finished summaries to an
//! injected `EmailSender`.  The production implementation posts to an HTTP
//! relay with basic credentials.  Transport failures surface as uncategorized
//! errors at the route boundary.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct EmailError(pub String);

#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, summary: &str, recipients: &[String]) -> Result<(), EmailError>;
}

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts `{summary, recipients}` as JSON to the configured relay endpoint.
pub struct RelayEmailSender {
    client: reqwest::Client,
    url: String,
    user: String,
    pass: String,
}

impl RelayEmailSender {
    pub fn new(url: String, user: String, pass: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            url,
            user,
            pass,
        }
    }
}

#[async_trait::async_trait]
impl EmailSender for RelayEmailSender {
    async fn send(&self, summary: &str, recipients: &[String]) -> Result<(), EmailError> {
        let body = serde_json::json!({
            "summary": summary,
            "recipients": recipients,
        });
        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await
            .map_err(|err| EmailError(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EmailError(format!(
                "email relay returned status {}",
                status.as_u16()
            )));
        }
        tracing::info!(recipients = recipients.len(), "summary dispatched by email");
        Ok(())
    }
}
