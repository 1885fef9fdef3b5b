use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{login_email_html, login_link, MailError, Mailer, LOGIN_SUBJECT};
use crate::config::{MailConfig, SmtpTls};

/// Sends login emails directly over SMTP.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    frontend_url: String,
}

impl SmtpMailer {
    pub fn new(host: &str, config: &MailConfig) -> Result<Self, MailError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| MailError::Message(format!("MAIL_FROM '{}': {e}", config.from)))?;

        let builder = match config.smtp_tls {
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.timeout()));
        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            frontend_url: config.frontend_url.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_token(
        &self,
        to_email: &str,
        to_name: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let address: Address = to_email
            .parse()
            .map_err(|e| MailError::Message(format!("recipient '{to_email}': {e}")))?;
        let link = login_link(&self.frontend_url, token);

        let message = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(Some(to_name.to_string()), address))
            .subject(LOGIN_SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(login_email_html(to_name, &link))
            .map_err(|e| MailError::Message(e.to_string()))?;

        if let Err(e) = self.transport.send(message).await {
            tracing::error!(to = %to_email, error = %e, "SMTP server rejected login email");
            return Err(e.into());
        }

        tracing::debug!(to = %to_email, "Login email sent over SMTP");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// A single-connection SMTP server that accepts everything except
    /// recipients listed in `reject`. Yields the client's side of the
    /// conversation.
    async fn spawn_smtp_server(reject: &'static [&'static str]) -> (u16, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut transcript = String::new();
            let mut in_data = false;

            write.write_all(b"220 mail.test ESMTP\r\n").await.unwrap();
            while let Ok(Some(line)) = lines.next_line().await {
                transcript.push_str(&line);
                transcript.push('\n');

                if in_data {
                    if line == "." {
                        in_data = false;
                        write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
                    }
                    continue;
                }

                let command = line.to_ascii_uppercase();
                let reply: &[u8] = if command.starts_with("EHLO") || command.starts_with("HELO") {
                    b"250 mail.test\r\n"
                } else if command.starts_with("RCPT")
                    && reject.iter().any(|r| line.contains(*r))
                {
                    b"550 5.1.1 no such user\r\n"
                } else if command.starts_with("DATA") {
                    in_data = true;
                    b"354 end data with <CR><LF>.<CR><LF>\r\n"
                } else if command.starts_with("QUIT") {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    b"250 OK\r\n"
                };
                write.write_all(reply).await.unwrap();
            }

            let _ = tx.send(transcript);
        });

        (port, rx)
    }

    fn mail_config(port: u16) -> MailConfig {
        MailConfig {
            frontend_url: "https://drive.example.com".to_string(),
            from: "Drive <no-reply@drive.example.com>".to_string(),
            smtp_port: port,
            smtp_tls: SmtpTls::None,
            timeout_seconds: 5,
            ..MailConfig::default()
        }
    }

    #[tokio::test]
    async fn test_login_email_is_delivered() {
        let (port, transcript) = spawn_smtp_server(&[]).await;
        let mailer = SmtpMailer::new("127.0.0.1", &mail_config(port)).unwrap();

        mailer.send_token("a@x.com", "Ann", "tok-1").await.unwrap();

        let transcript = transcript.await.unwrap();
        assert!(transcript.contains("MAIL FROM:<no-reply@drive.example.com>"), "{transcript}");
        assert!(transcript.contains("RCPT TO:<a@x.com>"), "{transcript}");
        assert!(transcript.contains(&format!("Subject: {LOGIN_SUBJECT}")), "{transcript}");
        assert!(transcript.contains("Content-Type: text/html"), "{transcript}");
    }

    #[tokio::test]
    async fn test_rejected_recipient_is_an_error() {
        let (port, _transcript) = spawn_smtp_server(&["nobody@x.com"]).await;
        let mailer = SmtpMailer::new("127.0.0.1", &mail_config(port)).unwrap();

        let result = mailer.send_token("nobody@x.com", "Nobody", "tok-1").await;
        assert!(matches!(result, Err(MailError::Smtp(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mailer = SmtpMailer::new("127.0.0.1", &mail_config(port)).unwrap();
        let result = mailer.send_token("a@x.com", "Ann", "tok-1").await;
        assert!(matches!(result, Err(MailError::Smtp(_))), "{result:?}");
    }

    #[test]
    fn test_invalid_sender_is_rejected() {
        let config = MailConfig {
            from: "not an address".to_string(),
            ..mail_config(25)
        };
        assert!(matches!(
            SmtpMailer::new("127.0.0.1", &config),
            Err(MailError::Message(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_rejected() {
        let mailer = SmtpMailer::new("127.0.0.1", &mail_config(25)).unwrap();
        let result = mailer.send_token("not-an-email", "A", "t").await;
        assert!(matches!(result, Err(MailError::Message(_))));
    }
}
