use anyhow::{anyhow, Context, Result};
use lettre::message::{header::ContentType, Attachment as MailAttachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use std::sync::{Arc, Mutex};

use crate::config::NotificationConfig;
use crate::db::Database;
use crate::error::{IntakeError, IntakeResult};
use crate::models::Job;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
    pub job_id: Option<String>,
    pub report_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Notifier {
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Notifier { config }
    }

    pub fn default_recipients(&self) -> &[String] {
        &self.config.to_addresses
    }

    pub async fn send(&self, db: &Arc<Mutex<Database>>, email: Email) -> IntakeResult<DeliveryReport> {
        let mut report = DeliveryReport::default();
        if email.to.is_empty() {
            return Ok(report);
        }

        if !self.config.enabled {
            tracing::debug!(subject = %email.subject, "Notifications disabled, skipping");
            let db = db.lock().map_err(|_| IntakeError::lock_poisoned("database"))?;
            for recipient in &email.to {
                db.log_notification(
                    "email",
                    recipient,
                    &email.subject,
                    "skipped",
                    None,
                    email.job_id.as_deref(),
                    email.report_id.as_deref(),
                )?;
                report.skipped += 1;
            }
            return Ok(report);
        }

        for recipient in &email.to {
            let outcome = match self.build_message(recipient, &email) {
                Ok(message) => {
                    let config = self.config.clone();
                    tokio::task::spawn_blocking(move || deliver(&config, &message))
                        .await
                        .map_err(|e| anyhow!("Mail task: {}", e))
                        .and_then(|result| result)
                }
                Err(err) => Err(err),
            };

            let db = db.lock().map_err(|_| IntakeError::lock_poisoned("database"))?;
            match outcome {
                Ok(()) => {
                    tracing::info!(recipient = %recipient, subject = %email.subject, "Email sent");
                    db.log_notification(
                        "email",
                        recipient,
                        &email.subject,
                        "sent",
                        None,
                        email.job_id.as_deref(),
                        email.report_id.as_deref(),
                    )?;
                    report.sent += 1;
                }
                Err(err) => {
                    tracing::warn!(recipient = %recipient, error = %err, "Email delivery failed");
                    db.log_notification(
                        "email",
                        recipient,
                        &email.subject,
                        "failed",
                        Some(&format!("{err:#}")),
                        email.job_id.as_deref(),
                        email.report_id.as_deref(),
                    )?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn build_message(&self, recipient: &str, email: &Email) -> Result<Message> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .context("Invalid from address")?;
        let to: Mailbox = recipient.parse().context("Invalid recipient address")?;
        let builder = Message::builder().from(from).to(to).subject(email.subject.clone());

        let message = match &email.attachment {
            Some(attachment) => builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(email.body.clone()))
                    .singlepart(
                        MailAttachment::new(attachment.filename.clone()).body(
                            attachment.bytes.clone(),
                            ContentType::parse(attachment.content_type)
                                .map_err(|e| anyhow!("Content type: {}", e))?,
                        ),
                    ),
            )?,
            None => builder.body(email.body.clone())?,
        };
        Ok(message)
    }
}

fn deliver(config: &NotificationConfig, message: &Message) -> Result<()> {
    let mut builder = SmtpTransport::starttls_relay(&config.smtp_host)
        .context("Invalid SMTP host")?
        .port(config.smtp_port);
    if !config.username.trim().is_empty() {
        let password = std::env::var(&config.password_env).unwrap_or_default();
        builder = builder.credentials(Credentials::new(config.username.clone(), password));
    }
    builder.build().send(message).context("SMTP send")?;
    Ok(())
}

/// Summary mail for a finished batch.
pub fn job_summary(job: &Job, blocked: usize, duplicates: usize) -> (String, String) {
    let subject = format!(
        "Invoice batch {}: {} of {} processed",
        job.status.as_str(),
        job.succeeded_files,
        job.total_files
    );
    let body = format!(
        "Job {}\n\nFiles: {}\nProcessed: {}\nFailed: {}\nBlocked by validation: {}\nDuplicates: {}\n\nThe extracted invoices are attached as an Excel file.\n",
        job.id, job.total_files, job.succeeded_files, job.failed_files, blocked, duplicates
    );
    (subject, body)
}
