//! Result delivery: push-queue messages with an email fallback.

use std::collections::HashMap;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use storage::queue::JobQueue;
use storage::records::{FileOutputRecord, RequestRecord, RequestStatus};

use crate::config::{EmailRetryConfig, SmtpConfig};

/// SMTP email sender. Absent SMTP configuration means log-only delivery.
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailService {
    pub fn from_config(config: &SmtpConfig) -> Option<Self> {
        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).ok()?;
        let builder = builder.port(config.port);
        let builder = if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder.credentials(Credentials::new(user.clone(), password.clone()))
        } else {
            builder
        };

        info!(host = %config.host, port = config.port, "Email service initialized");

        Some(Self {
            mailer: builder.build(),
            from: config.from.clone(),
        })
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let to_addr: Mailbox = to.parse().map_err(|e| format!("Invalid recipient: {}", e))?;
        let from_addr: Mailbox = self
            .from
            .parse()
            .map_err(|e| format!("Invalid sender: {}", e))?;

        let email = Message::builder()
            .from(from_addr)
            .to(to_addr)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| e.to_string())?;

        self.mailer.send(email).await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Push-queue notification payload.
#[derive(Debug, Serialize)]
pub struct NotificationMessage {
    pub request_name: String,
    pub status: String,
    pub reftime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Delivers terminal-state notifications. Queue delivery failure escalates
/// to an email describing both the original outcome and the delivery
/// failure; email delivery retries with fixed backoff before giving up
/// with a log line.
pub struct Notifier {
    email: Option<EmailService>,
    push: Option<Mutex<JobQueue>>,
    mail_directory: HashMap<Uuid, String>,
    download_base_url: Option<String>,
    retry: EmailRetryConfig,
}

impl Notifier {
    pub fn new(
        email: Option<EmailService>,
        push: Option<JobQueue>,
        mail_directory: HashMap<Uuid, String>,
        download_base_url: Option<String>,
        retry: EmailRetryConfig,
    ) -> Self {
        Self {
            email,
            push: push.map(Mutex::new),
            mail_directory,
            download_base_url,
            retry,
        }
    }

    /// Log-only notifier for tests and minimal deployments.
    pub fn disabled() -> Self {
        Self::new(None, None, HashMap::new(), None, EmailRetryConfig::default())
    }

    pub async fn notify(&self, record: &RequestRecord, output: Option<&FileOutputRecord>) {
        let message = self.build_message(record, output);

        if let Some(queue_name) = &record.args.push_queue {
            match self.push_message(queue_name, &message).await {
                Ok(()) => {
                    info!(request = %record.id, queue = %queue_name, "Delivered push notification");
                    return;
                }
                Err(e) => {
                    warn!(request = %record.id, error = %e, "Push delivery failed, falling back to email");
                    let body = format!(
                        "{}\n\nThe push notification to queue \"{}\" could not be \
                         delivered: {}",
                        self.email_body(&message),
                        queue_name,
                        e
                    );
                    self.send_email(record, &message, body).await;
                    return;
                }
            }
        }

        self.send_email(record, &message, self.email_body(&message))
            .await;
    }

    fn build_message(
        &self,
        record: &RequestRecord,
        output: Option<&FileOutputRecord>,
    ) -> NotificationMessage {
        let download_url = match (output, &self.download_base_url) {
            (Some(output), Some(base)) => Some(format!(
                "{}/{}/{}",
                base.trim_end_matches('/'),
                record.user_id,
                output.filename
            )),
            _ => None,
        };

        NotificationMessage {
            request_name: record.name.clone(),
            status: record.status.as_str().to_string(),
            reftime: record.args.reftime.key(),
            filename: output.map(|o| o.filename.clone()),
            download_url,
            error_message: record.error_message.clone(),
        }
    }

    async fn push_message(
        &self,
        queue_name: &str,
        message: &NotificationMessage,
    ) -> Result<(), String> {
        let push = self.push.as_ref().ok_or("push delivery not configured")?;
        let payload = serde_json::to_string(message).map_err(|e| e.to_string())?;

        push.lock()
            .await
            .publish(queue_name, &payload)
            .await
            .map_err(|e| e.to_string())
    }

    fn email_body(&self, message: &NotificationMessage) -> String {
        let mut body = format!(
            "Your extraction \"{}\" for {} finished with status {}.",
            message.request_name, message.reftime, message.status
        );

        if let Some(error) = &message.error_message {
            body.push_str(&format!("\n\nReason: {}", error));
        }

        match &message.download_url {
            Some(url) => body.push_str(&format!("\n\nDownload: {}", url)),
            None => {
                if message.status == RequestStatus::Success.as_str() {
                    body.push_str("\n\nThe result is available from your outputs page.");
                }
            }
        }

        body
    }

    async fn send_email(&self, record: &RequestRecord, message: &NotificationMessage, body: String) {
        let email = match &self.email {
            Some(email) => email,
            None => {
                info!(request = %record.id, status = %message.status, "Email delivery not configured, notification logged only");
                return;
            }
        };

        let recipient = match self.mail_directory.get(&record.user_id) {
            Some(recipient) => recipient.clone(),
            None => {
                warn!(request = %record.id, user = %record.user_id, "No email address on file, notification dropped");
                return;
            }
        };

        let subject = format!("Extraction \"{}\": {}", message.request_name, message.status);

        for attempt in 1..=self.retry.attempts {
            match email.send(&recipient, &subject, &body).await {
                Ok(()) => {
                    info!(request = %record.id, attempt = attempt, "Notification email sent");
                    return;
                }
                Err(e) if attempt < self.retry.attempts => {
                    warn!(request = %record.id, attempt = attempt, error = %e, "Email delivery failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(self.retry.backoff_secs))
                        .await;
                }
                Err(e) => {
                    error!(request = %record.id, attempts = self.retry.attempts, error = %e, "Email delivery failed, giving up");
                }
            }
        }
    }
}
