//! Delivery of one-time login links.
//!
//! The link embeds the token as a URL fragment against the frontend, so it is
//! never sent to the frontend's server: `{frontend_url}/login#token={token}`.

mod http;
mod smtp;

pub use http::HttpMailer;
pub use smtp::SmtpMailer;

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail relay error: {0}")]
    Relay(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid message: {0}")]
    Message(String),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a one-time login token to `to_email`, greeting `to_name`.
    async fn send_token(&self, to_email: &str, to_name: &str, token: &str)
        -> Result<(), MailError>;
}

pub const LOGIN_SUBJECT: &str = "Your login link";

pub fn login_link(frontend_url: &str, token: &str) -> String {
    format!("{}/login#token={token}", frontend_url.trim_end_matches('/'))
}

/// HTML body of the login email.
pub fn login_email_html(name: &str, link: &str) -> String {
    let name = escape_html(name);
    let link = escape_html(link);
    format!(
        "<!DOCTYPE html>\n<html><body>\
         <p>Hi {name},</p>\
         <p>Use the link below to sign in. It is valid for a few minutes and can only be used once.</p>\
         <p><a href=\"{link}\">Sign in</a></p>\
         <p>If you did not request this, you can ignore this email.</p>\
         </body></html>"
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Writes login links to the log instead of sending them. Development only.
pub struct LogMailer {
    frontend_url: String,
}

impl LogMailer {
    pub fn new(frontend_url: &str) -> Self {
        Self {
            frontend_url: frontend_url.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_token(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let link = login_link(&self.frontend_url, token);
        tracing::info!(to = %to_email, name = %to_name, link = %link, "Login link (not sent)");
        Ok(())
    }
}

/// A token handed to a `MemoryMailer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentToken {
    pub to_email: String,
    pub to_name: String,
    pub token: String,
}

/// Keeps sent tokens in memory so they can be read back.
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<SentToken>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All tokens sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentToken> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The most recent token sent to an address.
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|sent| sent.to_email == email)
            .map(|sent| sent.token)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send_token(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
    ) -> Result<(), MailError> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentToken {
                to_email: to_email.to_string(),
                to_name: to_name.to_string(),
                token: token.to_string(),
            });
        Ok(())
    }
}
