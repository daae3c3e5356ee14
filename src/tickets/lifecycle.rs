use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DepartmentRouting;
use crate::directory::{GraphClient, ResetState};
use crate::notify::{self, Mailer};
use crate::tickets::store::{NewTicket, StoreError, TicketStore};
use crate::tickets::{CreateTicketRequest, Ticket, TicketCategory, TicketPriority, TicketStatus};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid category")]
    InvalidCategory,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creation response: the persisted ticket, plus the one-time plaintext
/// password when an automated reset succeeded. The password exists only
/// here and in the completion mails; it is never stored or logged.
#[derive(Debug, Serialize)]
pub struct CreatedTicket {
    #[serde(flatten)]
    pub ticket: Ticket,
    #[serde(rename = "newPassword", skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
}

/// Orchestrates ticket creation end-to-end: category gate, atomic number
/// allocation and insert, outbox notifications, and the password-reset
/// saga for the privileged category.
pub struct TicketLifecycle {
    store: Arc<dyn TicketStore>,
    mailer: Arc<dyn Mailer>,
    directory: Option<Arc<GraphClient>>,
    routing: DepartmentRouting,
}

impl TicketLifecycle {
    pub fn new(
        store: Arc<dyn TicketStore>,
        mailer: Arc<dyn Mailer>,
        directory: Option<Arc<GraphClient>>,
        routing: DepartmentRouting,
    ) -> Self {
        Self {
            store,
            mailer,
            directory,
            routing,
        }
    }

    pub async fn create_ticket(
        &self,
        req: CreateTicketRequest,
    ) -> Result<CreatedTicket, LifecycleError> {
        // Category gate runs before any side effect: no number allocated,
        // nothing persisted, no mail enqueued for an unknown category.
        let category =
            TicketCategory::parse(&req.category).ok_or(LifecycleError::InvalidCategory)?;
        let mailbox = self
            .routing
            .mailbox_for(category)
            .ok_or(LifecycleError::InvalidCategory)?
            .to_string();
        let priority = req
            .priority
            .as_deref()
            .and_then(TicketPriority::parse)
            .unwrap_or_default();

        let mut ticket = self
            .store
            .create(NewTicket {
                requester_id: req.user_id,
                requester_name: req.user_name,
                requester_email: req.user_email,
                category,
                description: req.description,
                priority,
            })
            .await?;
        info!(
            "Ticket #{} created ({})",
            ticket.ticket_number,
            category.as_str()
        );

        if !ticket.requester_email.is_empty() {
            self.enqueue(notify::confirmation_mail(&ticket)).await;
        }
        self.enqueue(notify::department_mail(&ticket, &mailbox)).await;

        let new_password = if category == TicketCategory::PasswordReset {
            self.run_password_reset(&mut ticket, &mailbox).await
        } else {
            None
        };

        Ok(CreatedTicket {
            ticket,
            new_password,
        })
    }

    /// Manual close. Closing an already-Closed ticket is a no-op that
    /// returns the current record.
    pub async fn close_ticket(&self, id: Uuid) -> Result<Ticket, LifecycleError> {
        let ticket = self.store.update_status(id, TicketStatus::Closed).await?;
        info!("Ticket #{} closed", ticket.ticket_number);
        Ok(ticket)
    }

    async fn enqueue(&self, mail: notify::QueuedMail) {
        // Outbox enqueue is best-effort relative to the creation response.
        if let Err(e) = self.store.enqueue_mail(mail).await {
            warn!("Failed to enqueue notification: {e}");
        }
    }

    /// One-shot reset saga: pending -> completed (ticket auto-closed,
    /// password returned once) or failed (ticket stays Open). No automatic
    /// retry; the persisted saga row makes an operator re-trigger safe.
    async fn run_password_reset(&self, ticket: &mut Ticket, mailbox: &str) -> Option<String> {
        self.record_saga(ticket.id, ResetState::Pending, None).await;

        let client = match &self.directory {
            Some(client) => Arc::clone(client),
            None => {
                error!(
                    "Password reset for ticket #{} skipped: directory integration not configured",
                    ticket.ticket_number
                );
                self.record_saga(
                    ticket.id,
                    ResetState::Failed,
                    Some("directory integration not configured".to_string()),
                )
                .await;
                return None;
            }
        };

        match client.reset_password(&ticket.requester_id).await {
            Ok(password) => {
                match self.store.update_status(ticket.id, TicketStatus::Closed).await {
                    Ok(updated) => *ticket = updated,
                    Err(e) => error!(
                        "Failed to close ticket #{} after password reset: {e}",
                        ticket.ticket_number
                    ),
                }

                // Completion mails are synchronous: they carry the one-time
                // password and must not transit the persisted outbox. A send
                // failure is logged; the ticket stays Closed and the caller
                // still receives the password.
                if !ticket.requester_email.is_empty() {
                    if let Err(e) = self
                        .mailer
                        .send(&notify::reset_user_mail(ticket, &password))
                        .await
                    {
                        error!(
                            "Password reset notification to requester failed for ticket #{}: {e}",
                            ticket.ticket_number
                        );
                    }
                }
                if let Err(e) = self
                    .mailer
                    .send(&notify::reset_department_mail(ticket, &password, mailbox))
                    .await
                {
                    error!(
                        "Password reset notification to department failed for ticket #{}: {e}",
                        ticket.ticket_number
                    );
                }

                self.record_saga(ticket.id, ResetState::Completed, None).await;
                info!(
                    "Ticket #{} auto-closed after password reset",
                    ticket.ticket_number
                );
                Some(password)
            }
            Err(e) => {
                error!(
                    "Password reset failed for ticket #{}: {e}",
                    ticket.ticket_number
                );
                self.record_saga(ticket.id, ResetState::Failed, Some(e.to_string()))
                    .await;
                None
            }
        }
    }

    async fn record_saga(&self, ticket_id: Uuid, state: ResetState, error: Option<String>) {
        if let Err(e) = self.store.set_reset_state(ticket_id, state, error).await {
            warn!("Failed to record reset saga state for {ticket_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DepartmentRouting, DirectoryConfig};
    use crate::tests::test_util::RecordingMailer;
    use crate::tickets::store::MemoryTicketStore;
    use std::collections::HashMap;

    fn request(category: &str) -> CreateTicketRequest {
        CreateTicketRequest {
            category: category.to_string(),
            description: "PTO next week".to_string(),
            priority: Some("Low".to_string()),
            user_id: "u1".to_string(),
            user_name: "Alice".to_string(),
            user_email: "alice@x.com".to_string(),
        }
    }

    fn lifecycle_with(
        store: MemoryTicketStore,
        mailer: Arc<RecordingMailer>,
        directory: Option<Arc<GraphClient>>,
    ) -> TicketLifecycle {
        TicketLifecycle::new(
            Arc::new(store),
            mailer as Arc<dyn Mailer>,
            directory,
            DepartmentRouting::defaults(),
        )
    }

    fn graph_client(url: &str) -> Arc<GraphClient> {
        Arc::new(
            GraphClient::new(DirectoryConfig {
                authority: url.to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                api_url: url.to_string(),
                timeout_secs: 5,
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn invalid_category_has_no_side_effects() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(store.clone(), Arc::clone(&mailer), None);

        let err = lifecycle.create_ticket(request("Imaginary")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidCategory));
        assert!(store.list(None).await.unwrap().is_empty());
        assert!(store.pending_mail(10).await.unwrap().is_empty());
        assert!(mailer.sent().await.is_empty());

        // Counter untouched: the next valid ticket is still #1.
        let created = lifecycle.create_ticket(request("Leave Request")).await.unwrap();
        assert_eq!(created.ticket.ticket_number, 1);
    }

    #[tokio::test]
    async fn category_missing_from_routing_is_rejected() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = TicketLifecycle::new(
            Arc::new(store.clone()),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            None,
            DepartmentRouting::new(HashMap::new()),
        );

        let err = lifecycle
            .create_ticket(request("Leave Request"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidCategory));
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_enqueues_confirmation_and_department_mail() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(store.clone(), Arc::clone(&mailer), None);

        let created = lifecycle.create_ticket(request("Leave Request")).await.unwrap();
        assert_eq!(created.ticket.status, TicketStatus::Open);
        assert!(created.new_password.is_none());

        let queued = store.pending_mail(10).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().any(|m| m.recipient == "alice@x.com"));
        assert!(queued
            .iter()
            .any(|m| m.subject == "[TICKET #1] Leave Request"));
        // Nothing goes through the mailer synchronously on the happy path.
        assert!(mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn anonymous_requester_gets_no_confirmation_mail() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(store.clone(), Arc::clone(&mailer), None);

        let mut req = request("Payroll Issue");
        req.user_email = String::new();
        lifecycle.create_ticket(req).await.unwrap();

        let queued = store.pending_mail(10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].subject.starts_with("[TICKET #1]"));
    }

    #[tokio::test]
    async fn password_reset_success_closes_ticket_and_returns_password() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/v2.0/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;
        server
            .mock("PATCH", "/v1.0/users/u1")
            .with_status(204)
            .create_async()
            .await;

        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(
            store.clone(),
            Arc::clone(&mailer),
            Some(graph_client(&server.url())),
        );

        let created = lifecycle.create_ticket(request("Password Reset")).await.unwrap();
        let password = created.new_password.expect("password in response");
        assert_eq!(created.ticket.status, TicketStatus::Closed);

        let stored = store.find_by_id(created.ticket.id).await.unwrap();
        assert_eq!(stored.status, TicketStatus::Closed);
        // The stored record never contains the plaintext password.
        let stored_json = serde_json::to_string(&stored).unwrap();
        assert!(!stored_json.contains(&password));

        let saga = store.reset_state(created.ticket.id).await.unwrap().unwrap();
        assert_eq!(saga.state, ResetState::Completed);
        assert!(saga.error.is_none());

        // Completion mails went out synchronously, to requester and dept.
        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.body.contains(&password)));
    }

    #[tokio::test]
    async fn password_reset_failure_leaves_ticket_open() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/v2.0/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;
        server
            .mock("PATCH", "/v1.0/users/u1")
            .with_status(403)
            .with_body(r#"{"error":{"code":"Authorization_RequestDenied"}}"#)
            .create_async()
            .await;

        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(
            store.clone(),
            Arc::clone(&mailer),
            Some(graph_client(&server.url())),
        );

        let created = lifecycle.create_ticket(request("Password Reset")).await.unwrap();
        assert!(created.new_password.is_none());
        assert_eq!(created.ticket.status, TicketStatus::Open);

        let saga = store.reset_state(created.ticket.id).await.unwrap().unwrap();
        assert_eq!(saga.state, ResetState::Failed);
        assert!(saga.error.is_some());

        // No completion mail without a successful reset.
        assert!(mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn password_reset_without_directory_config_fails_saga() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(store.clone(), Arc::clone(&mailer), None);

        let created = lifecycle.create_ticket(request("Password Reset")).await.unwrap();
        assert!(created.new_password.is_none());
        assert_eq!(created.ticket.status, TicketStatus::Open);

        let saga = store.reset_state(created.ticket.id).await.unwrap().unwrap();
        assert_eq!(saga.state, ResetState::Failed);
        assert_eq!(
            saga.error.as_deref(),
            Some("directory integration not configured")
        );
    }

    #[tokio::test]
    async fn close_ticket_is_idempotent() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(store.clone(), Arc::clone(&mailer), None);

        let created = lifecycle.create_ticket(request("Admin Access")).await.unwrap();
        let closed = lifecycle.close_ticket(created.ticket.id).await.unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);

        let again = lifecycle.close_ticket(created.ticket.id).await.unwrap();
        assert_eq!(again.status, TicketStatus::Closed);
        assert_eq!(again.updated_at, closed.updated_at);
    }

    #[tokio::test]
    async fn close_missing_ticket_is_not_found() {
        let store = MemoryTicketStore::new();
        let mailer = RecordingMailer::new();
        let lifecycle = lifecycle_with(store, Arc::clone(&mailer), None);

        let err = lifecycle.close_ticket(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Store(StoreError::NotFound)));
    }
}
