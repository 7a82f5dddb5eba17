use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::{AppError, AppResult};
use crate::server_config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub provider_id: String,
}

/// Transport failures keep their retry class: a 5xx/connection problem is
/// retried under the job policy, a 4xx rejection is not.
#[derive(Debug, Clone, derive_more::Display)]
#[display("{message}")]
pub struct TransportError {
    pub message: String,
    pub retryable: bool,
}

impl std::error::Error for TransportError {}

#[async_trait::async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, TransportError>;
}

pub struct SmtpEmailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailTransport {
    pub fn new(cfg: &SmtpConfig) -> AppResult<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .map_err(|e| AppError::PermanentDependency(format!("bad SMTP relay config: {e}")))?
            .port(cfg.port);

        if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn mailbox(email: &str, name: Option<&str>) -> Result<Mailbox, TransportError> {
    let formatted = match name {
        Some(name) => format!("{name} <{email}>"),
        None => format!("<{email}>"),
    };
    formatted.parse().map_err(|e| TransportError {
        message: format!("invalid mailbox '{email}': {e}"),
        retryable: false,
    })
}

#[async_trait::async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, TransportError> {
        let builder = Message::builder()
            .from(mailbox(&email.from_email, email.from_name.as_deref())?)
            .to(mailbox(&email.to_email, email.to_name.as_deref())?)
            .subject(email.subject.clone());

        let message = match &email.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                email.html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(email.html.clone()),
        }
        .map_err(|e| TransportError {
            message: format!("could not build message: {e}"),
            retryable: false,
        })?;

        match self.transport.send(message).await {
            Ok(response) => Ok(DeliveryReceipt {
                provider_id: format!("smtp-{}", response.code()),
            }),
            Err(e) => Err(TransportError {
                retryable: !e.is_permanent(),
                message: e.to_string(),
            }),
        }
    }
}
