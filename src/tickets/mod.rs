pub mod lifecycle;
pub mod store;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::state::AppState;
use lifecycle::{CreatedTicket, LifecycleError};
use store::StoreError;

/// The closed set of ticket categories. Wire strings use the spaced names;
/// anything else is rejected before a ticket number is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketCategory {
    #[serde(rename = "Password Reset")]
    PasswordReset,
    #[serde(rename = "Admin Access")]
    AdminAccess,
    #[serde(rename = "Payroll Issue")]
    PayrollIssue,
    #[serde(rename = "Expense Reimbursement")]
    ExpenseReimbursement,
    #[serde(rename = "Leave Request")]
    LeaveRequest,
    #[serde(rename = "Employee Onboarding")]
    EmployeeOnboarding,
}

impl TicketCategory {
    pub const ALL: [TicketCategory; 6] = [
        TicketCategory::PasswordReset,
        TicketCategory::AdminAccess,
        TicketCategory::PayrollIssue,
        TicketCategory::ExpenseReimbursement,
        TicketCategory::LeaveRequest,
        TicketCategory::EmployeeOnboarding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::PasswordReset => "Password Reset",
            TicketCategory::AdminAccess => "Admin Access",
            TicketCategory::PayrollIssue => "Payroll Issue",
            TicketCategory::ExpenseReimbursement => "Expense Reimbursement",
            TicketCategory::LeaveRequest => "Leave Request",
            TicketCategory::EmployeeOnboarding => "Employee Onboarding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "Low",
            TicketPriority::Medium => "Medium",
            TicketPriority::High => "High",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(TicketPriority::Low),
            "Medium" => Some(TicketPriority::Medium),
            "High" => Some(TicketPriority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "Open",
            TicketStatus::Closed => "Closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(TicketStatus::Open),
            "Closed" => Some(TicketStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    #[serde(rename = "ticketNumber")]
    pub ticket_number: i64,
    #[serde(rename = "userId")]
    pub requester_id: String,
    #[serde(rename = "userName")]
    pub requester_name: String,
    #[serde(rename = "userEmail")]
    pub requester_email: String,
    pub category: TicketCategory,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketRequest {
    /// Defaulted so a missing key reaches the category gate and gets the
    /// 400 body instead of an extractor rejection.
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "userName", default)]
    pub user_name: String,
    #[serde(rename = "userEmail", default)]
    pub user_email: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid category")]
    InvalidCategory,
    #[error("Ticket not found")]
    NotFound,
    #[error("Server error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidCategory => ApiError::InvalidCategory,
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::InvalidCategory => (StatusCode::BAD_REQUEST, "Invalid category"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Ticket not found"),
            ApiError::Internal(detail) => {
                log::error!("Request failed: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    // `?userId=` with an empty value means "no filter", not "the requester
    // with an empty id".
    let requester = query.user_id.as_deref().filter(|id| !id.is_empty());
    let tickets = state.store.list(requester).await?;
    Ok(Json(tickets))
}

/// A malformed id cannot name any ticket, so it gets the same 404 body as
/// an unknown one instead of an extractor rejection.
fn parse_ticket_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let id = parse_ticket_id(&id)?;
    let ticket = state.store.find_by_id(id).await?;
    Ok(Json(ticket))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<CreatedTicket>), ApiError> {
    let created = state.lifecycle.create_ticket(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let id = parse_ticket_id(&id)?;
    let ticket = state.lifecycle.close_ticket(id).await?;
    Ok(Json(ticket))
}

pub async fn service_banner() -> &'static str {
    "IT Ticket API - OK"
}

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state.store.ping().await;

    let status = if db_ok { "healthy" } else { "degraded" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "ticketserver",
            "version": env!("CARGO_PKG_VERSION"),
            "database": db_ok
        })),
    )
}

pub fn configure_ticket_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(service_banner))
        .route("/health", get(health_check))
        .route("/tickets", get(list_tickets).post(create_ticket))
        .route("/tickets/:id", get(get_ticket))
        .route("/tickets/:id/close", put(close_ticket))
}
