use serde::Serialize;
use tracing::{error, info};

use crate::config::MailProvider;

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug)]
pub enum MailError {
    Request(reqwest::Error),
    HttpStatus { status: reqwest::StatusCode, body: String },
    MissingRecipient,
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Request(err) => write!(f, "mail request failed: {err}"),
            MailError::HttpStatus { status, body } => write!(f, "mail API returned {status}: {body}"),
            MailError::MissingRecipient => write!(f, "recipient address is empty"),
        }
    }
}

impl std::error::Error for MailError {}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        MailError::Request(err)
    }
}

/// A plain-text message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
pub struct Mailer {
    provider: MailProvider,
    from_address: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendGridPayload<'a> {
    personalizations: Vec<SendGridPersonalization<'a>>,
    from: SendGridAddress<'a>,
    subject: &'a str,
    content: Vec<SendGridContent<'a>>,
}

#[derive(Serialize)]
struct SendGridPersonalization<'a> {
    to: Vec<SendGridAddress<'a>>,
}

#[derive(Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

impl Mailer {
    pub fn new(provider: MailProvider, from_address: impl Into<String>) -> Self {
        Self {
            provider,
            from_address: from_address.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if mail.to.trim().is_empty() {
            return Err(MailError::MissingRecipient);
        }

        match &self.provider {
            MailProvider::Log => {
                info!(
                    from = %self.from_address,
                    to = %mail.to,
                    subject = %mail.subject,
                    body = %mail.body,
                    "outgoing mail (log transport)"
                );
                Ok(())
            }
            MailProvider::SendGrid { api_key } => self.send_via_sendgrid(api_key, mail).await,
        }
    }

    /// Sends `mail`, logging instead of returning any delivery failure.
    pub async fn send_best_effort(&self, mail: &OutgoingMail) {
        if let Err(err) = self.send(mail).await {
            error!(%err, to = %mail.to, subject = %mail.subject, "failed to deliver mail");
        }
    }

    async fn send_via_sendgrid(&self, api_key: &str, mail: &OutgoingMail) -> Result<(), MailError> {
        let payload = sendgrid_payload(&self.from_address, mail);

        let resp = self
            .client
            .post(SENDGRID_ENDPOINT)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::HttpStatus { status, body });
        }

        Ok(())
    }
}

fn sendgrid_payload<'a>(from: &'a str, mail: &'a OutgoingMail) -> SendGridPayload<'a> {
    SendGridPayload {
        personalizations: vec![SendGridPersonalization {
            to: vec![SendGridAddress { email: &mail.to }],
        }],
        from: SendGridAddress { email: from },
        subject: &mail.subject,
        content: vec![SendGridContent {
            content_type: "text/plain",
            value: &mail.body,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutgoingMail {
        OutgoingMail {
            to: "student@example.com".into(),
            subject: "Enrollment Approved for Algebra".into(),
            body: "Dear student,".into(),
        }
    }

    #[test]
    fn sendgrid_payload_shape() {
        let mail = sample();
        let value = serde_json::to_value(sendgrid_payload("noreply@example.com", &mail)).unwrap();
        assert_eq!(value["from"]["email"], "noreply@example.com");
        assert_eq!(value["personalizations"][0]["to"][0]["email"], "student@example.com");
        assert_eq!(value["content"][0]["type"], "text/plain");
        assert_eq!(value["subject"], "Enrollment Approved for Algebra");
    }

    #[tokio::test]
    async fn log_transport_accepts_mail() {
        let mailer = Mailer::new(MailProvider::Log, "noreply@example.com");
        assert!(mailer.send(&sample()).await.is_ok());
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected() {
        let mailer = Mailer::new(MailProvider::Log, "noreply@example.com");
        let mut mail = sample();
        mail.to = "  ".into();
        assert!(matches!(
            mailer.send(&mail).await,
            Err(MailError::MissingRecipient)
        ));
    }
}
