//! Error notification email via Mandrill.
//!
//! Sending is configured from the environment:
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `MANDRILL_API_KEY` | yes | |
//! | `EMAIL_FROM` | yes | |
//! | `EMAIL_TO` | yes | |
//! | `EMAIL_FROM_NAME` | no | `PaperAdScraper` |
//!
//! Without the required variables, notifications are skipped. A failed send is
//! logged and never reaches the caller.

use chrono::Local;
use serde_json::json;
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument, warn};

const MANDRILL_SEND_URL: &str = "https://mandrillapp.com/api/1.0/messages/send";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FROM_NAME: &str = "PaperAdScraper";

#[derive(Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
    pub from_name: String,
    pub to: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("from", &self.from)
            .field("from_name", &self.from_name)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl EmailConfig {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let required = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Some(Self {
            api_key: required("MANDRILL_API_KEY")?,
            from: required("EMAIL_FROM")?,
            to: required("EMAIL_TO")?,
            from_name: required("EMAIL_FROM_NAME").unwrap_or_else(|| DEFAULT_FROM_NAME.to_string()),
        })
    }
}

/// Sends failure reports; a no-op when email is not configured.
#[derive(Debug, Clone)]
pub struct Notifier {
    config: Option<EmailConfig>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: Option<EmailConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Report `error`, which happened while working on `context`.
    #[instrument(level = "info", skip_all, fields(%subject))]
    pub async fn send_error(&self, subject: &str, error: &dyn Error, context: &str) {
        let Some(config) = &self.config else {
            info!("Email not configured, skipping notification");
            return;
        };

        let payload = build_payload(config, subject, error, context);
        let sent = self
            .client
            .post(MANDRILL_SEND_URL)
            .timeout(SEND_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        match sent {
            Ok(resp) if resp.status().is_success() => {
                info!(to = %config.to, "Error notification sent");
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                warn!(status, %body, "Failed to send notification");
            }
            Err(e) => warn!(error = %e, "Failed to send notification"),
        }
    }
}

/// Error message followed by each `source()` in the chain.
fn error_chain(error: &dyn Error) -> String {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}

fn build_payload(
    config: &EmailConfig,
    subject: &str,
    error: &dyn Error,
    context: &str,
) -> serde_json::Value {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let chain = error_chain(error);

    let html = format!(
        "<h2>Paper Ad Scan - Error Report</h2>\n\
         <p><strong>Time:</strong> {timestamp}</p>\n\
         <p><strong>Context:</strong> {context}</p>\n\
         <p><strong>Error:</strong> {error}</p>\n\
         <h3>Cause chain</h3>\n\
         <pre style=\"background:#f5f5f5;padding:12px;border-radius:4px;font-size:13px;\">{chain}</pre>\n"
    );
    let text = format!(
        "Paper Ad Scan - Error Report\n\
         Time: {timestamp}\n\
         Context: {context}\n\
         Error: {error}\n\n\
         Cause chain:\n{chain}\n"
    );

    json!({
        "key": config.api_key,
        "message": {
            "from_email": config.from,
            "from_name": config.from_name,
            "to": [{ "email": config.to, "type": "to" }],
            "subject": format!("[PaperAdScan] {subject}"),
            "html": html,
            "text": text,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_requires_key_from_and_to() {
        assert!(EmailConfig::from_lookup(lookup(&[("MANDRILL_API_KEY", "k")])).is_none());

        let config = EmailConfig::from_lookup(lookup(&[
            ("MANDRILL_API_KEY", "k"),
            ("EMAIL_FROM", "bot@example.com"),
            ("EMAIL_TO", "ops@example.com"),
        ]))
        .unwrap();
        assert_eq!(config.from_name, "PaperAdScraper");
    }

    #[test]
    fn test_payload_shape() {
        let config = EmailConfig {
            api_key: "k".to_string(),
            from: "bot@example.com".to_string(),
            from_name: "Scanner".to_string(),
            to: "ops@example.com".to_string(),
        };
        let error = std::io::Error::other("disk full");

        let payload = build_payload(&config, "Error processing ajc 2026-02-27", &error, "Paper: AJC");

        assert_eq!(payload["message"]["subject"], "[PaperAdScan] Error processing ajc 2026-02-27");
        assert_eq!(payload["message"]["to"][0]["email"], "ops@example.com");
        assert!(payload["message"]["text"].as_str().unwrap().contains("Error: disk full"));
    }

    #[tokio::test]
    async fn test_unconfigured_send_is_a_no_op() {
        let notifier = Notifier::new(None);
        notifier
            .send_error("subject", &std::io::Error::other("boom"), "ctx")
            .await;
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = EmailConfig {
            api_key: "secret".to_string(),
            from: "a".to_string(),
            from_name: "b".to_string(),
            to: "c".to_string(),
        };
        assert!(!format!("{config:?}").contains("secret"));
    }
}
