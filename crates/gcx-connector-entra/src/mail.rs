//! Operator notifications sent as Graph mail.

use std::sync::Arc;

use async_trait::async_trait;
use gcx_onboard::{Notification, NotificationSink, NotifyError};
use serde::Serialize;
use tracing::instrument;

use crate::graph_client::GraphClient;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: Message<'a>,
    save_to_sent_items: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Message<'a> {
    subject: &'a str,
    body: ItemBody<'a>,
    to_recipients: Vec<Recipient<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: EmailAddress<'a>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    address: &'a str,
}

/// Sends each notification from `sender`'s mailbox to every recipient.
pub struct GraphMailSink {
    client: Arc<GraphClient>,
    sender: String,
    recipients: Vec<String>,
}

impl GraphMailSink {
    pub fn new(
        client: Arc<GraphClient>,
        sender: impl Into<String>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            client,
            sender: sender.into(),
            recipients,
        }
    }

    fn request<'a>(&'a self, notification: &'a Notification) -> SendMailRequest<'a> {
        SendMailRequest {
            message: Message {
                subject: &notification.subject,
                body: ItemBody {
                    content_type: "HTML",
                    content: &notification.body,
                },
                to_recipients: self
                    .recipients
                    .iter()
                    .map(|address| Recipient {
                        email_address: EmailAddress { address },
                    })
                    .collect(),
            },
            save_to_sent_items: false,
        }
    }
}

#[async_trait]
impl NotificationSink for GraphMailSink {
    #[instrument(skip_all, fields(subject = %notification.subject))]
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.recipients.is_empty() {
            return Err(NotifyError("no recipients configured".to_string()));
        }
        let url = self.client.url(&format!(
            "users/{}/sendMail",
            urlencoding::encode(&self.sender)
        ));
        self.client
            .post(&url, &self.request(notification))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntraConfig, EntraCredentials, TokenCache};

    #[test]
    fn test_request_shape() {
        let config = EntraConfig::builder().tenant_id("t").build().unwrap();
        let tokens = Arc::new(TokenCache::new(
            &config,
            EntraCredentials::app("c", "s".to_string().into()),
        ));
        let sink = GraphMailSink::new(
            Arc::new(GraphClient::new(&config, tokens).unwrap()),
            "noreply@example.org",
            vec!["ops@example.org".to_string(), "lead@example.org".to_string()],
        );
        let note = Notification {
            subject: "Sync failed".to_string(),
            body: "<p>x</p>".to_string(),
        };

        let value = serde_json::to_value(sink.request(&note)).unwrap();
        assert_eq!(value["saveToSentItems"], false);
        assert_eq!(value["message"]["body"]["contentType"], "HTML");
        assert_eq!(
            value["message"]["toRecipients"][1]["emailAddress"]["address"],
            "lead@example.org"
        );
    }
}
