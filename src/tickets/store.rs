use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::directory::{ResetSagaRecord, ResetState};
use crate::notify::QueuedMail;
use crate::shared::schema::{notification_outbox, password_reset_sagas, ticket_counters, tickets};
use crate::shared::utils::DbPool;
use crate::tickets::{Ticket, TicketCategory, TicketPriority, TicketStatus};

const COUNTER_ID: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Ticket not found")]
    NotFound,
    #[error("Ticket number conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub requester_id: String,
    pub requester_name: String,
    pub requester_email: String,
    pub category: TicketCategory,
    pub description: String,
    pub priority: TicketPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "sent" => Some(OutboxStatus::Sent),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// A queued notification row. The body of a password-bearing mail is never
/// written here; those are sent synchronously by the reset saga.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Durable home of every ticket, its reset saga row, and the notification
/// outbox. Ticket number allocation lives here so that allocation and
/// insert are a single atomic step.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn create(&self, new: NewTicket) -> Result<Ticket, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Ticket, StoreError>;
    async fn list(&self, requester_id: Option<&str>) -> Result<Vec<Ticket>, StoreError>;
    async fn update_status(&self, id: Uuid, status: TicketStatus) -> Result<Ticket, StoreError>;
    async fn ping(&self) -> bool;

    async fn set_reset_state(
        &self,
        ticket_id: Uuid,
        state: ResetState,
        error: Option<String>,
    ) -> Result<(), StoreError>;
    async fn reset_state(&self, ticket_id: Uuid) -> Result<Option<ResetSagaRecord>, StoreError>;

    async fn enqueue_mail(&self, mail: QueuedMail) -> Result<(), StoreError>;
    async fn pending_mail(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError>;
    async fn mark_mail_sent(&self, id: Uuid) -> Result<(), StoreError>;
    async fn mark_mail_failed(&self, id: Uuid, error: &str, give_up: bool)
        -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = tickets)]
struct TicketRow {
    id: Uuid,
    ticket_number: i64,
    requester_id: String,
    requester_name: String,
    requester_email: String,
    category: String,
    description: String,
    priority: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, StoreError> {
        let category = TicketCategory::parse(&row.category)
            .ok_or_else(|| StoreError::Database(format!("unknown category: {}", row.category)))?;
        let priority = TicketPriority::parse(&row.priority)
            .ok_or_else(|| StoreError::Database(format!("unknown priority: {}", row.priority)))?;
        let status = TicketStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Database(format!("unknown status: {}", row.status)))?;
        Ok(Ticket {
            id: row.id,
            ticket_number: row.ticket_number,
            requester_id: row.requester_id,
            requester_name: row.requester_name,
            requester_email: row.requester_email,
            category,
            description: row.description,
            priority,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Queryable)]
struct SagaRow {
    ticket_id: Uuid,
    state: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SagaRow> for ResetSagaRecord {
    type Error = StoreError;

    fn try_from(row: SagaRow) -> Result<Self, StoreError> {
        let state = ResetState::parse(&row.state)
            .ok_or_else(|| StoreError::Database(format!("unknown saga state: {}", row.state)))?;
        Ok(ResetSagaRecord {
            ticket_id: row.ticket_id,
            state,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Queryable)]
struct OutboxRow {
    id: Uuid,
    ticket_id: Uuid,
    recipient: String,
    subject: String,
    body: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, StoreError> {
        let status = OutboxStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Database(format!("unknown outbox status: {}", row.status)))?;
        Ok(OutboxEntry {
            id: row.id,
            ticket_id: row.ticket_id,
            recipient: row.recipient,
            subject: row.subject,
            body: row.body,
            status,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            sent_at: row.sent_at,
        })
    }
}

fn pool_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

fn map_diesel_error(e: diesel::result::Error) -> StoreError {
    match e {
        diesel::result::Error::NotFound => StoreError::NotFound,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            info,
        ) => StoreError::Conflict(info.message().to_string()),
        other => StoreError::Database(other.to_string()),
    }
}

#[derive(Clone)]
pub struct PgTicketStore {
    pool: DbPool,
}

impl PgTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Seed or heal the counter row from the highest persisted ticket
    /// number. Run once at startup; makes numbering survive restarts even
    /// if the counter table was dropped or reset.
    pub async fn ensure_counter(&self) -> Result<i64, StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<i64, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            diesel::sql_query(
                "INSERT INTO ticket_counters (id, last_number) \
                 VALUES (1, COALESCE((SELECT MAX(ticket_number) FROM tickets), 0)) \
                 ON CONFLICT (id) DO UPDATE \
                 SET last_number = GREATEST(ticket_counters.last_number, EXCLUDED.last_number)",
            )
            .execute(&mut conn)
            .map_err(map_diesel_error)?;

            ticket_counters::table
                .find(COUNTER_ID)
                .select(ticket_counters::last_number)
                .get_result(&mut conn)
                .map_err(map_diesel_error)
        })
        .await
        .map_err(pool_err)?
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn create(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<TicketRow, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            // Counter bump and insert share the transaction: concurrent
            // creations serialize on the counter row, and a failed insert
            // rolls the number back instead of burning it.
            conn.transaction::<TicketRow, diesel::result::Error, _>(|conn| {
                let next: i64 = diesel::update(ticket_counters::table.find(COUNTER_ID))
                    .set(ticket_counters::last_number.eq(ticket_counters::last_number + 1))
                    .returning(ticket_counters::last_number)
                    .get_result(conn)?;

                let now = Utc::now();
                let row = TicketRow {
                    id: Uuid::new_v4(),
                    ticket_number: next,
                    requester_id: new.requester_id.clone(),
                    requester_name: new.requester_name.clone(),
                    requester_email: new.requester_email.clone(),
                    category: new.category.as_str().to_string(),
                    description: new.description.clone(),
                    priority: new.priority.as_str().to_string(),
                    status: TicketStatus::Open.as_str().to_string(),
                    created_at: now,
                    updated_at: now,
                };
                diesel::insert_into(tickets::table)
                    .values(&row)
                    .execute(conn)?;
                Ok(row)
            })
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    StoreError::Database("ticket counter not initialized".to_string())
                }
                other => map_diesel_error(other),
            })
        })
        .await
        .map_err(pool_err)??;

        Ticket::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Ticket, StoreError> {
        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<TicketRow, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            tickets::table
                .find(id)
                .first(&mut conn)
                .map_err(map_diesel_error)
        })
        .await
        .map_err(pool_err)??;

        Ticket::try_from(row)
    }

    async fn list(&self, requester_id: Option<&str>) -> Result<Vec<Ticket>, StoreError> {
        let pool = self.pool.clone();
        let requester_id = requester_id.map(str::to_string);
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<TicketRow>, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            let mut query = tickets::table.into_boxed();
            if let Some(requester) = requester_id {
                query = query.filter(tickets::requester_id.eq(requester));
            }
            query
                .order(tickets::ticket_number.asc())
                .load(&mut conn)
                .map_err(map_diesel_error)
        })
        .await
        .map_err(pool_err)??;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, status: TicketStatus) -> Result<Ticket, StoreError> {
        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<TicketRow, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;

            // Closed is terminal: the update only ever moves Open rows, so a
            // concurrent or repeated close falls through to the re-fetch and
            // returns the current record unchanged.
            if status == TicketStatus::Closed {
                let updated: Option<TicketRow> = diesel::update(
                    tickets::table
                        .find(id)
                        .filter(tickets::status.eq(TicketStatus::Open.as_str())),
                )
                .set((
                    tickets::status.eq(TicketStatus::Closed.as_str()),
                    tickets::updated_at.eq(Utc::now()),
                ))
                .get_result(&mut conn)
                .optional()
                .map_err(map_diesel_error)?;

                if let Some(row) = updated {
                    return Ok(row);
                }
            }

            tickets::table
                .find(id)
                .first(&mut conn)
                .map_err(map_diesel_error)
        })
        .await
        .map_err(pool_err)??;

        Ticket::try_from(row)
    }

    async fn ping(&self) -> bool {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || match pool.get() {
            Ok(mut conn) => diesel::sql_query("SELECT 1").execute(&mut conn).is_ok(),
            Err(_) => false,
        })
        .await
        .unwrap_or(false)
    }

    async fn set_reset_state(
        &self,
        ticket_id: Uuid,
        state: ResetState,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            let now = Utc::now();
            diesel::insert_into(password_reset_sagas::table)
                .values((
                    password_reset_sagas::ticket_id.eq(ticket_id),
                    password_reset_sagas::state.eq(state.as_str()),
                    password_reset_sagas::error.eq(error.clone()),
                    password_reset_sagas::created_at.eq(now),
                    password_reset_sagas::updated_at.eq(now),
                ))
                .on_conflict(password_reset_sagas::ticket_id)
                .do_update()
                .set((
                    password_reset_sagas::state.eq(state.as_str()),
                    password_reset_sagas::error.eq(error),
                    password_reset_sagas::updated_at.eq(now),
                ))
                .execute(&mut conn)
                .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
        .map_err(pool_err)?
    }

    async fn reset_state(&self, ticket_id: Uuid) -> Result<Option<ResetSagaRecord>, StoreError> {
        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<Option<SagaRow>, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            password_reset_sagas::table
                .find(ticket_id)
                .first(&mut conn)
                .optional()
                .map_err(map_diesel_error)
        })
        .await
        .map_err(pool_err)??;

        row.map(ResetSagaRecord::try_from).transpose()
    }

    async fn enqueue_mail(&self, mail: QueuedMail) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            diesel::insert_into(notification_outbox::table)
                .values((
                    notification_outbox::id.eq(Uuid::new_v4()),
                    notification_outbox::ticket_id.eq(mail.ticket_id),
                    notification_outbox::recipient.eq(mail.recipient),
                    notification_outbox::subject.eq(mail.subject),
                    notification_outbox::body.eq(mail.body),
                    notification_outbox::status.eq(OutboxStatus::Pending.as_str()),
                    notification_outbox::attempts.eq(0),
                    notification_outbox::created_at.eq(Utc::now()),
                ))
                .execute(&mut conn)
                .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
        .map_err(pool_err)?
    }

    async fn pending_mail(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<OutboxRow>, StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            notification_outbox::table
                .filter(notification_outbox::status.eq(OutboxStatus::Pending.as_str()))
                .order(notification_outbox::created_at.asc())
                .limit(limit)
                .load(&mut conn)
                .map_err(map_diesel_error)
        })
        .await
        .map_err(pool_err)??;

        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    async fn mark_mail_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            diesel::update(notification_outbox::table.find(id))
                .set((
                    notification_outbox::status.eq(OutboxStatus::Sent.as_str()),
                    notification_outbox::sent_at.eq(Some(Utc::now())),
                ))
                .execute(&mut conn)
                .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
        .map_err(pool_err)?
    }

    async fn mark_mail_failed(
        &self,
        id: Uuid,
        error: &str,
        give_up: bool,
    ) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let error = error.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = pool.get().map_err(pool_err)?;
            let status = if give_up {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
            diesel::update(notification_outbox::table.find(id))
                .set((
                    notification_outbox::status.eq(status.as_str()),
                    notification_outbox::attempts.eq(notification_outbox::attempts + 1),
                    notification_outbox::last_error.eq(Some(error)),
                ))
                .execute(&mut conn)
                .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
        .map_err(pool_err)?
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    last_number: i64,
    tickets: HashMap<Uuid, Ticket>,
    sagas: HashMap<Uuid, ResetSagaRecord>,
    outbox: Vec<OutboxEntry>,
}

/// In-memory store for tests and for running without a database. The
/// counter and the ticket map share one lock, which gives the same gap-free
/// numbering guarantee as the transactional Postgres allocator within a
/// single process.
#[derive(Clone, Default)]
pub struct MemoryTicketStore {
    inner: Arc<tokio::sync::Mutex<MemoryInner>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh store from another store's surviving rows, recomputing
    /// the counter from the highest ticket number. Simulates a process
    /// restart in tests.
    pub async fn reopen_from(other: &MemoryTicketStore) -> Self {
        let inner = other.inner.lock().await;
        let last_number = inner
            .tickets
            .values()
            .map(|t| t.ticket_number)
            .max()
            .unwrap_or(0);
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(MemoryInner {
                last_number,
                tickets: inner.tickets.clone(),
                sagas: inner.sagas.clone(),
                outbox: inner.outbox.clone(),
            })),
        }
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn create(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.last_number += 1;
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            ticket_number: inner.last_number,
            requester_id: new.requester_id,
            requester_name: new.requester_name,
            requester_email: new.requester_email,
            category: new.category,
            description: new.description,
            priority: new.priority,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
        };
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Ticket, StoreError> {
        let inner = self.inner.lock().await;
        inner.tickets.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list(&self, requester_id: Option<&str>) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| requester_id.map_or(true, |r| t.requester_id == r))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.ticket_number);
        Ok(out)
    }

    async fn update_status(&self, id: Uuid, status: TicketStatus) -> Result<Ticket, StoreError> {
        let mut inner = self.inner.lock().await;
        let ticket = inner.tickets.get_mut(&id).ok_or(StoreError::NotFound)?;
        if ticket.status == TicketStatus::Open && status == TicketStatus::Closed {
            ticket.status = TicketStatus::Closed;
            ticket.updated_at = Utc::now();
        }
        Ok(ticket.clone())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn set_reset_state(
        &self,
        ticket_id: Uuid,
        state: ResetState,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        inner
            .sagas
            .entry(ticket_id)
            .and_modify(|saga| {
                saga.state = state;
                saga.error = error.clone();
                saga.updated_at = now;
            })
            .or_insert(ResetSagaRecord {
                ticket_id,
                state,
                error,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn reset_state(&self, ticket_id: Uuid) -> Result<Option<ResetSagaRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sagas.get(&ticket_id).cloned())
    }

    async fn enqueue_mail(&self, mail: QueuedMail) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.outbox.push(OutboxEntry {
            id: Uuid::new_v4(),
            ticket_id: mail.ticket_id,
            recipient: mail.recipient,
            subject: mail.subject,
            body: mail.body,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            sent_at: None,
        });
        Ok(())
    }

    async fn pending_mail(&self, limit: i64) -> Result<Vec<OutboxEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_mail_sent(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.outbox.iter_mut().find(|e| e.id == id) {
            entry.status = OutboxStatus::Sent;
            entry.sent_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_mail_failed(
        &self,
        id: Uuid,
        error: &str,
        give_up: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.outbox.iter_mut().find(|e| e.id == id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.status = if give_up {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
        }
        Ok(())
    }
}
