//! Email transports.
//!
//! [`EmailTransport`] sends one rendered message and returns the provider's
//! message id. [`SmtpTransport`] relays through an SMTP server via
//! `lettre`; [`HttpTransport`] posts JSON to an email API that answers
//! `{"id": ...}` or `{"error": ...}`. Retrying is left to the provider.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

/// HTTP request timeout for a single send.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    /// The provider answered but refused the message.
    #[error("Email provider rejected message (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

// ---------------------------------------------------------------------------
// EmailTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send one message, returning the provider's message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, TransportError>;
}

// ---------------------------------------------------------------------------
// SMTP
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "Training Portal <noreply@portal.local>";

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" mailbox.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set.
    ///
    /// | Variable        | Required | Default                                  |
    /// |-----------------|----------|------------------------------------------|
    /// | `SMTP_HOST`     | yes      | -                                        |
    /// | `SMTP_PORT`     | no       | `587`                                    |
    /// | `SMTP_FROM`     | no       | `Training Portal <noreply@portal.local>` |
    /// | `SMTP_USER`     | no       | -                                        |
    /// | `SMTP_PASSWORD` | no       | -                                        |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    /// Build the pooled mailer. No connection is opened until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from: config.from_address.parse()?,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, TransportError> {
        let to = Mailbox::new(Some(email.to_name.clone()), email.to.parse()?);
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| TransportError::Build(e.to_string()))?;

        let response = self.mailer.send(message).await?;
        Ok(response.first_line().unwrap_or_default().to_string())
    }
}

// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from_address: String,
}

impl HttpTransportConfig {
    /// Returns `None` if `EMAIL_API_URL` is not set.
    ///
    /// | Variable        | Required | Default                                  |
    /// |-----------------|----------|------------------------------------------|
    /// | `EMAIL_API_URL` | yes      | -                                        |
    /// | `EMAIL_API_KEY` | no       | -                                        |
    /// | `EMAIL_FROM`    | no       | `Training Portal <noreply@portal.local>` |
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var("EMAIL_API_URL").ok()?;
        Some(Self {
            api_url,
            api_key: std::env::var("EMAIL_API_KEY").ok(),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
        })
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SendResponse {
    Sent { id: String },
    Failed { error: String },
}

pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmailTransport for HttpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, TransportError> {
        let body = SendRequest {
            from: &self.config.from_address,
            to: &email.to,
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let mut request = self.client.post(&self.config.api_url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let parsed = response.json::<SendResponse>().await;

        match (status.is_success(), parsed) {
            (true, Ok(SendResponse::Sent { id })) => Ok(id),
            (_, Ok(SendResponse::Failed { error })) => Err(TransportError::Rejected {
                status: status.as_u16(),
                message: error,
            }),
            (false, _) => Err(TransportError::Rejected {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            }),
            (true, Err(e)) => Err(TransportError::Request(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
