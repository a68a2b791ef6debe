//! Notification dispatch.
//!
//! Handlers fire named notifications through the `Notifier` seam; this
//! module ships the SMTP transport. With `DEBUG_NOTIFICATIONS` set the
//! mailer short-circuits to structured logs so development runs never send
//! real mail.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::Value;

use db::schema::{Notifier, NotifyError};

use crate::config::Config;

pub struct MailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    debug_notifications: bool,
}

impl MailNotifier {
    pub fn from_config(config: &Config) -> Result<MailNotifier, NotifyError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.mail_server)
                .port(config.mail_port);
        if let Some(args) = &config.mail_args {
            let username = args.get("username").and_then(Value::as_str);
            let password = args.get("password").and_then(Value::as_str);
            if let (Some(username), Some(password)) = (username, password) {
                builder = builder
                    .credentials(Credentials::new(username.to_string(), password.to_string()));
            }
        }
        let transport = builder.build();
        let sender = config
            .mail_sender
            .parse()
            .map_err(|_| NotifyError::Transport(format!("invalid sender `{}`", config.mail_sender)))?;
        Ok(MailNotifier {
            transport,
            sender,
            debug_notifications: config.debug_notifications,
        })
    }

    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        text: Option<&str>,
        html: Option<&str>,
    ) -> Result<(), NotifyError> {
        if self.debug_notifications {
            tracing::info!(to, subject, ?text, ?html, "notification suppressed");
            return Ok(());
        }

        let to: Mailbox = to
            .parse()
            .map_err(|_| NotifyError::Transport(format!("invalid recipient `{to}`")))?;
        let builder = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject);

        let message = match (text, html) {
            (Some(text), Some(html)) => builder
                .multipart(MultiPart::alternative_plain_html(
                    text.to_string(),
                    html.to_string(),
                ))
                .map_err(|err| NotifyError::Transport(err.to_string()))?,
            (Some(text), None) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.to_string())
                .map_err(|err| NotifyError::Transport(err.to_string()))?,
            (None, Some(html)) => builder
                .header(ContentType::TEXT_HTML)
                .body(html.to_string())
                .map_err(|err| NotifyError::Transport(err.to_string()))?,
            (None, None) => {
                return Err(NotifyError::Transport(
                    "neither text nor html has been provided".to_string(),
                ));
            }
        };

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|err| NotifyError::Transport(err.to_string()))
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn notify(&self, name: &str, payload: Value) -> Result<(), NotifyError> {
        match name {
            "forgot_password" => {
                let email = payload["actor"]["email"]
                    .as_str()
                    .ok_or_else(|| NotifyError::Transport("payload without actor email".into()))?;
                let code = payload["token"]["code"]
                    .as_str()
                    .ok_or_else(|| NotifyError::Transport("payload without token code".into()))?;
                let text = format!(
                    "A password reset was requested for this address.\n\
                     Use the code {code} to choose a new password.\n\
                     If you didn't request it, ignore this mail."
                );
                self.send_email(email, "Password recovery", Some(&text), None).await
            }
            other => Err(NotifyError::Unknown(other.to_string())),
        }
    }
}

/// Logs every notification; handy default for tests and headless setups.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, name: &str, payload: Value) -> Result<(), NotifyError> {
        tracing::info!(name, %payload, "notification");
        Ok(())
    }
}
