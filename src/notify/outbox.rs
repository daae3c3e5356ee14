use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::config::OutboxConfig;
use crate::notify::{MailMessage, Mailer};
use crate::tickets::store::TicketStore;

/// Background worker that drains the notification outbox through the
/// mailer. Delivery failures are retried up to a bounded attempt count and
/// never surface to any HTTP caller.
pub struct OutboxWorker {
    store: Arc<dyn TicketStore>,
    mailer: Arc<dyn Mailer>,
    interval_secs: u64,
    max_attempts: i32,
    batch_size: i64,
}

impl OutboxWorker {
    pub fn new(store: Arc<dyn TicketStore>, mailer: Arc<dyn Mailer>, config: &OutboxConfig) -> Self {
        Self {
            store,
            mailer,
            interval_secs: config.interval_secs,
            max_attempts: config.max_attempts,
            batch_size: config.batch_size,
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Notification outbox worker started");
            let mut tick = interval(Duration::from_secs(self.interval_secs));
            loop {
                tick.tick().await;
                self.drain_once().await;
            }
        })
    }

    /// One drain pass. Returns the number of mails delivered.
    pub async fn drain_once(&self) -> usize {
        let pending = match self.store.pending_mail(self.batch_size).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to load pending notifications: {e}");
                return 0;
            }
        };

        let mut delivered = 0;
        for entry in pending {
            let message = MailMessage {
                to: entry.recipient.clone(),
                subject: entry.subject.clone(),
                body: entry.body.clone(),
            };
            match self.mailer.send(&message).await {
                Ok(()) => {
                    info!(
                        "Notification for ticket {} delivered to {}",
                        entry.ticket_id, entry.recipient
                    );
                    if let Err(e) = self.store.mark_mail_sent(entry.id).await {
                        error!("Failed to mark notification {} sent: {e}", entry.id);
                    }
                    delivered += 1;
                }
                Err(e) => {
                    let attempt = entry.attempts + 1;
                    let give_up = attempt >= self.max_attempts;
                    warn!(
                        "Notification delivery to {} failed (attempt {attempt}/{}): {e}",
                        entry.recipient, self.max_attempts
                    );
                    if give_up {
                        error!(
                            "Giving up on notification {} for ticket {}",
                            entry.id, entry.ticket_id
                        );
                    }
                    if let Err(e) = self
                        .store
                        .mark_mail_failed(entry.id, &e.to_string(), give_up)
                        .await
                    {
                        error!("Failed to record delivery failure for {}: {e}", entry.id);
                    }
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::QueuedMail;
    use crate::tests::test_util::{FailingMailer, RecordingMailer};
    use crate::tickets::store::{MemoryTicketStore, NewTicket};
    use crate::tickets::{TicketCategory, TicketPriority};

    fn config() -> OutboxConfig {
        OutboxConfig {
            interval_secs: 1,
            max_attempts: 2,
            batch_size: 10,
        }
    }

    async fn store_with_queued_mail() -> (MemoryTicketStore, uuid::Uuid) {
        let store = MemoryTicketStore::new();
        let ticket = store
            .create(NewTicket {
                requester_id: "u1".to_string(),
                requester_name: "Alice".to_string(),
                requester_email: "alice@x.com".to_string(),
                category: TicketCategory::AdminAccess,
                description: "access please".to_string(),
                priority: TicketPriority::High,
            })
            .await
            .unwrap();
        store
            .enqueue_mail(QueuedMail {
                ticket_id: ticket.id,
                recipient: "it@example.com".to_string(),
                subject: "[TICKET #1] Admin Access".to_string(),
                body: "New Support Ticket #1".to_string(),
            })
            .await
            .unwrap();
        (store, ticket.id)
    }

    #[tokio::test]
    async fn drains_pending_mail_through_the_mailer() {
        let (store, _) = store_with_queued_mail().await;
        let mailer = RecordingMailer::new();
        let worker = OutboxWorker::new(
            Arc::new(store.clone()),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            &config(),
        );

        assert_eq!(worker.drain_once().await, 1);
        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "it@example.com");
        assert!(store.pending_mail(10).await.unwrap().is_empty());

        // Nothing left to deliver.
        assert_eq!(worker.drain_once().await, 0);
    }

    #[tokio::test]
    async fn failing_delivery_retries_then_gives_up() {
        let (store, _) = store_with_queued_mail().await;
        let worker = OutboxWorker::new(
            Arc::new(store.clone()),
            Arc::new(FailingMailer),
            &config(),
        );

        assert_eq!(worker.drain_once().await, 0);
        let pending = store.pending_mail(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());

        // Second failure hits max_attempts and parks the row as failed.
        assert_eq!(worker.drain_once().await, 0);
        assert!(store.pending_mail(10).await.unwrap().is_empty());
    }
}
