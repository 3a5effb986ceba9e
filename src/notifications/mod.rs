use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Transactional email templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    PurchaseConfirmation,
    AccountProvisioned,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseConfirmation => "purchase_confirmation",
            Self::AccountProvisioned => "account_provisioned",
        }
    }
}

pub type TemplateVariables = BTreeMap<String, String>;

/// Mailer errors
#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Mail transport failed: {0}")]
    Transport(String),
    #[error("Mail provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid mail provider response: {0}")]
    InvalidResponse(String),
}

/// Email boundary. Callers treat sends as fire-and-forget.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends `template` to `recipient` and returns the provider's message id.
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        variables: TemplateVariables,
    ) -> Result<String, MailerError>;
}

/// Writes emails to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        variables: TemplateVariables,
    ) -> Result<String, MailerError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        info!(
            template = template.as_str(),
            recipient,
            message_id = %message_id,
            variables = ?variables,
            "Email suppressed by log mailer"
        );
        Ok(message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub message_id: String,
    pub template: EmailTemplate,
    pub recipient: String,
    pub variables: TemplateVariables,
}

/// Keeps sent emails in memory so callers can inspect the outbox.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    outbox: RwLock<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.outbox.read().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        variables: TemplateVariables,
    ) -> Result<String, MailerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailerError::Transport("memory mailer set to fail".into()));
        }
        let message_id = format!("mem-{}", Uuid::new_v4());
        self.outbox.write().await.push(SentEmail {
            message_id: message_id.clone(),
            template,
            recipient: recipient.to_string(),
            variables,
        });
        Ok(message_id)
    }
}

#[derive(Debug, Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: &'a str,
    template: &'a str,
    variables: &'a TemplateVariables,
}

#[derive(Debug, Deserialize)]
struct OutboundEmailAccepted {
    id: String,
}

/// Delivers through a JSON mail API (`POST {endpoint}` with a bearer key).
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        from: String,
        timeout: Duration,
    ) -> Result<Self, MailerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, variables), fields(template = template.as_str()))]
    async fn send(
        &self,
        template: EmailTemplate,
        recipient: &str,
        variables: TemplateVariables,
    ) -> Result<String, MailerError> {
        let body = OutboundEmail {
            from: &self.from,
            to: recipient,
            template: template.as_str(),
            variables: &variables,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Mail provider error: {}", message);
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let accepted: OutboundEmailAccepted = response
            .json()
            .await
            .map_err(|e| MailerError::InvalidResponse(e.to_string()))?;
        Ok(accepted.id)
    }
}
