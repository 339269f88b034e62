//! WhatsApp delivery through the Twilio Messages API.

use async_trait::async_trait;
use intake_flow::{FlowError, HandoffNotifier, ReplySender, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::TwilioConfig;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const ADVISOR_ALERT_HEADER: &str = "🔔 Aviso interno KiosKeys";
const WHATSAPP_PREFIX: &str = "whatsapp:";

#[derive(Clone)]
pub struct TwilioClient {
    config: TwilioConfig,
    http_client: reqwest::Client,
    api_base_url: String,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            api_base_url: TWILIO_API_BASE.to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base_url, self.config.account_sid
        )
    }
}

#[async_trait]
impl ReplySender for TwilioClient {
    async fn send(&self, client_id: &str, text: &str) -> Result<()> {
        let params = [
            ("From", self.config.whatsapp_from.as_str()),
            ("To", client_id),
            ("Body", text),
        ];

        let response = self
            .http_client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| FlowError::Collaborator(format!("Twilio request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, error = %error_text, "Twilio send failed");
            return Err(FlowError::Collaborator(format!(
                "Twilio API error {status}: {error_text}"
            )));
        }

        debug!(client_id, "Message delivered to Twilio");
        Ok(())
    }
}

/// Stand-in sender used when Twilio is not configured: replies only reach the log
pub struct LoggingSender;

#[async_trait]
impl ReplySender for LoggingSender {
    async fn send(&self, client_id: &str, text: &str) -> Result<()> {
        info!(client_id, reply = %text, "Reply not delivered (dry run)");
        Ok(())
    }
}

/// Alerts the advisor's WhatsApp number, never the client's own chat
pub struct WhatsAppHandoffNotifier {
    sender: Arc<dyn ReplySender>,
    advisor: Option<String>,
}

impl WhatsAppHandoffNotifier {
    pub fn new(sender: Arc<dyn ReplySender>, advisor: Option<String>) -> Self {
        let advisor = advisor
            .map(|to| bare_number(&to).to_string())
            .filter(|to| !to.is_empty());
        Self { sender, advisor }
    }
}

#[async_trait]
impl HandoffNotifier for WhatsAppHandoffNotifier {
    async fn notify(&self, client_id: &str, summary: &str) -> Result<()> {
        let Some(advisor) = &self.advisor else {
            debug!(client_id, "No advisor number configured, alert skipped");
            return Ok(());
        };
        if advisor == bare_number(client_id) {
            debug!(client_id, "Advisor is the client, alert skipped");
            return Ok(());
        }
        self.sender
            .send(
                &format!("{WHATSAPP_PREFIX}{advisor}"),
                &format!("{ADVISOR_ALERT_HEADER}\n{summary}"),
            )
            .await
    }
}

fn bare_number(address: &str) -> &str {
    address.trim().strip_prefix(WHATSAPP_PREFIX).unwrap_or(address.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl ReplySender for Outbox {
        async fn send(&self, client_id: &str, text: &str) -> Result<()> {
            self.0.lock().unwrap().push((client_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_alert_goes_to_advisor_with_header() {
        let outbox = Arc::new(Outbox::default());
        let notifier = WhatsAppHandoffNotifier::new(outbox.clone(), Some("+5491100000001".to_string()));

        notifier
            .notify("whatsapp:+5491155550000", "Ticket: 123456")
            .await
            .unwrap();

        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "whatsapp:+5491100000001");
        assert_eq!(sent[0].1, "🔔 Aviso interno KiosKeys\nTicket: 123456");
    }

    #[tokio::test]
    async fn test_alert_skipped_without_advisor_or_for_own_chat() {
        let outbox = Arc::new(Outbox::default());

        let unset = WhatsAppHandoffNotifier::new(outbox.clone(), None);
        unset.notify("whatsapp:+5491155550000", "hola").await.unwrap();

        let blank = WhatsAppHandoffNotifier::new(outbox.clone(), Some("whatsapp:".to_string()));
        blank.notify("whatsapp:+5491155550000", "hola").await.unwrap();

        let same = WhatsAppHandoffNotifier::new(outbox.clone(), Some("whatsapp:+5491155550000".to_string()));
        same.notify("whatsapp:+5491155550000", "hola").await.unwrap();

        assert!(outbox.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_messages_url() {
        let client = TwilioClient::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            whatsapp_from: "whatsapp:+14155238886".to_string(),
        });
        assert_eq!(
            client.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }
}
