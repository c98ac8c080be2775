//! Outbound notification dispatch.
//!
//! The mailer is a seam: production uses [`HttpMailer`] against a
//! transactional-email HTTP API, dev/offline environments use
//! [`NullMailer`]. The [`Dispatcher`] owns retry behaviour; idempotency is
//! the store's job (the `email_sent` flag is flipped before a send is ever
//! attempted).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::lifecycle::{NotificationIntent, CONFIRMATION_TEMPLATE};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("transient mail failure: {0}")]
    Transient(String),
    #[error("permanent mail failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub template: String,
    pub subject: String,
    pub variables: serde_json::Value,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// POSTs messages to a transactional-email provider.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": message.to,
                "template": message.template,
                "subject": message.subject,
                "variables": message.variables,
            }))
            .send()
            .await
            .map_err(|err| MailError::Transient(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(MailError::Permanent(format!("{status}: {body}")))
        } else {
            Err(MailError::Transient(format!("{status}: {body}")))
        }
    }
}

/// Logs instead of sending. Used when no provider is configured.
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(to = %message.to, template = %message.template, "mail provider not configured, dropping message");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("mail provider rejected the message: {0}")]
    Permanent(String),
    #[error("mail provider unavailable after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

pub struct Dispatcher {
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, retry: RetryPolicy) -> Self {
        Self { mailer, retry }
    }

    /// Send the booking confirmation for one intent. Transient provider
    /// failures retry with doubling delay up to `max_attempts`; permanent
    /// rejections stop immediately.
    pub async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), DispatchError> {
        let message = confirmation_message(intent);
        let mut delay = self.retry.base_delay;
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.mailer.send(&message).await {
                Ok(()) => {
                    info!(lead_id = %intent.lead_id, attempt, "booking confirmation sent");
                    return Ok(());
                }
                Err(MailError::Permanent(reason)) => {
                    warn!(lead_id = %intent.lead_id, %reason, "booking confirmation rejected");
                    return Err(DispatchError::Permanent(reason));
                }
                Err(MailError::Transient(reason)) => {
                    warn!(lead_id = %intent.lead_id, attempt, %reason, "booking confirmation attempt failed");
                    last_error = reason;
                }
            }
            if attempt < self.retry.max_attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(DispatchError::Exhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }
}

pub fn confirmation_message(intent: &NotificationIntent) -> EmailMessage {
    EmailMessage {
        to: intent.recipient.clone(),
        template: CONFIRMATION_TEMPLATE.to_string(),
        subject: "Your mould inspection is booked".to_string(),
        variables: json!({
            "firstName": intent.first_name,
            "inspectionDate": intent.booking.date.to_string(),
            "inspectionTime": intent.booking.time,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Booking;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn intent() -> NotificationIntent {
        NotificationIntent {
            lead_id: Uuid::new_v4(),
            recipient: "dana@example.com".into(),
            first_name: "Dana".into(),
            booking: Booking {
                date: "2025-01-22".parse().unwrap(),
                time: "09:00".into(),
            },
        }
    }

    fn no_backoff(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::ZERO,
        }
    }

    struct FlakyMailer {
        failures_before_success: u32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures_before_success {
                Err(MailError::Transient("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    struct RejectingMailer {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Mailer for RejectingMailer {
        async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
            *self.calls.lock().unwrap() += 1;
            Err(MailError::Permanent("550 no such mailbox".into()))
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let mailer = Arc::new(FlakyMailer {
            failures_before_success: 2,
            calls: Mutex::new(0),
        });
        let dispatcher = Dispatcher::new(mailer.clone(), no_backoff(3));
        dispatcher.dispatch(&intent()).await.unwrap();
        assert_eq!(*mailer.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mailer = Arc::new(FlakyMailer {
            failures_before_success: 10,
            calls: Mutex::new(0),
        });
        let dispatcher = Dispatcher::new(mailer.clone(), no_backoff(3));
        let err = dispatcher.dispatch(&intent()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Exhausted { attempts: 3, .. }));
        assert_eq!(*mailer.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let mailer = Arc::new(RejectingMailer {
            calls: Mutex::new(0),
        });
        let dispatcher = Dispatcher::new(mailer.clone(), no_backoff(5));
        let err = dispatcher.dispatch(&intent()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Permanent(_)));
        assert_eq!(*mailer.calls.lock().unwrap(), 1);
    }

    #[test]
    fn confirmation_message_renders_booking() {
        let message = confirmation_message(&intent());
        assert_eq!(message.to, "dana@example.com");
        assert_eq!(message.template, CONFIRMATION_TEMPLATE);
        assert_eq!(message.variables["inspectionDate"], "2025-01-22");
        assert_eq!(message.variables["inspectionTime"], "09:00");
    }
}
