use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{login_email_html, login_link, MailError, Mailer, LOGIN_SUBJECT};
use crate::config::MailConfig;

/// Hands login emails to an HTTP mail relay as JSON.
pub struct HttpMailer {
    client: Client,
    relay_url: String,
    from: String,
    frontend_url: String,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    to_name: &'a str,
    subject: &'a str,
    html: String,
}

impl HttpMailer {
    pub fn new(relay_url: &str, config: &MailConfig) -> Result<Self, MailError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            relay_url: relay_url.to_string(),
            from: config.from.clone(),
            frontend_url: config.frontend_url.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_token(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let link = login_link(&self.frontend_url, token);
        let message = RelayMessage {
            from: &self.from,
            to: to_email,
            to_name,
            subject: LOGIN_SUBJECT,
            html: login_email_html(to_name, &link),
        };

        let resp = self
            .client
            .post(&self.relay_url)
            .json(&message)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(to = %to_email, %status, "Mail relay rejected login email");
            return Err(MailError::Relay(format!(
                "relay responded {status}: {body}"
            )));
        }

        tracing::debug!(to = %to_email, "Login email handed to relay");
        Ok(())
    }
}
