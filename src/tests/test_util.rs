use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Once;

use crate::notify::{MailError, MailMessage, Mailer};

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Mailer double that records every message instead of delivering it.
pub struct RecordingMailer {
    sent: tokio::sync::Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub async fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &MailMessage) -> Result<(), MailError> {
        self.sent.lock().await.push(mail.clone());
        Ok(())
    }
}

/// Mailer double whose every send fails.
pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _mail: &MailMessage) -> Result<(), MailError> {
        Err(MailError::Smtp("connection refused".to_string()))
    }
}
