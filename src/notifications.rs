use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::error::MailError;
use crate::models::Digest;

/// Outbound transport for digests
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, digest: &Digest) -> Result<(), MailError>;
}

/// SMTP mailer built on lettre
pub struct SmtpMailer {
    transport: SmtpTransport,
    sender: Mailbox,
    subject: String,
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let sender = config.sender.as_deref().ok_or_else(|| MailError::Address {
            address: String::new(),
            reason: "mail.sender is not configured".to_string(),
        })?;

        let mut builder = if config.starttls {
            SmtpTransport::starttls_relay(&config.smtp_host)?
        } else {
            SmtpTransport::builder_dangerous(&config.smtp_host)
        }
        .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            sender: parse_mailbox(sender)?,
            subject: config.subject.clone(),
        })
    }

    fn build_message(&self, digest: &Digest) -> Result<Message, MailError> {
        Ok(Message::builder()
            .from(self.sender.clone())
            .to(parse_mailbox(&digest.recipient)?)
            .subject(self.subject.clone())
            .body(digest.body.clone())?)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, digest: &Digest) -> Result<(), MailError> {
        let message = self.build_message(digest)?;
        let transport = self.transport.clone();

        debug!(recipient = %digest.recipient, "Sending digest");

        tokio::task::spawn_blocking(move || transport.send(&message)).await??;

        info!(recipient = %digest.recipient, "Digest sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MailConfig {
        MailConfig {
            sender: Some("scrutiny@example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_mailer_requires_sender() {
        let result = SmtpMailer::new(&MailConfig::default());
        assert!(matches!(result, Err(MailError::Address { .. })));
    }

    #[test]
    fn test_build_message_headers() {
        let mailer = SmtpMailer::new(&config()).unwrap();
        let digest = Digest {
            recipient: "team@example.com".to_string(),
            body: "hello".to_string(),
        };

        let raw = String::from_utf8(mailer.build_message(&digest).unwrap().formatted()).unwrap();
        assert!(raw.contains("From: scrutiny@example.com"));
        assert!(raw.contains("To: team@example.com"));
        assert!(raw.contains("Subject: [gerrit] Changes required attention"));
    }

    #[test]
    fn test_invalid_recipient() {
        let mailer = SmtpMailer::new(&config()).unwrap();
        let digest = Digest {
            recipient: "not an address".to_string(),
            body: String::new(),
        };

        assert!(matches!(
            mailer.build_message(&digest),
            Err(MailError::Address { .. })
        ));
    }
}
