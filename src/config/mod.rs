use std::collections::HashMap;

use crate::tickets::TicketCategory;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: Option<String>,
    pub smtp: SmtpConfig,
    pub directory: Option<DirectoryConfig>,
    pub routing: DepartmentRouting,
    pub outbox: OutboxConfig,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Clone)]
pub struct DirectoryConfig {
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone)]
pub struct OutboxConfig {
    pub interval_secs: u64,
    pub max_attempts: i32,
    pub batch_size: i64,
}

/// Category -> department mailbox table, injected into the lifecycle at
/// construction. A category with no mailbox is rejected as invalid before
/// any side effect.
#[derive(Clone)]
pub struct DepartmentRouting {
    mailboxes: HashMap<String, String>,
}

impl DepartmentRouting {
    pub fn new(mailboxes: HashMap<String, String>) -> Self {
        Self { mailboxes }
    }

    /// Fixed default table. Reads nothing from the environment, so tests
    /// built on it are hermetic; env overrides live in `from_env`.
    pub fn defaults() -> Self {
        let mut mailboxes = HashMap::new();
        for (category, mailbox) in [
            (TicketCategory::PasswordReset, "it-support@example.com"),
            (TicketCategory::AdminAccess, "it-support@example.com"),
            (TicketCategory::PayrollIssue, "finance@example.com"),
            (TicketCategory::ExpenseReimbursement, "finance@example.com"),
            (TicketCategory::LeaveRequest, "hr@example.com"),
            (TicketCategory::EmployeeOnboarding, "hr@example.com"),
        ] {
            mailboxes.insert(category.as_str().to_string(), mailbox.to_string());
        }
        Self { mailboxes }
    }

    fn set_department(&mut self, categories: &[TicketCategory], mailbox: &str) {
        for category in categories {
            self.mailboxes
                .insert(category.as_str().to_string(), mailbox.to_string());
        }
    }

    /// Defaults plus environment overrides: `IT_MAILBOX`, `FINANCE_MAILBOX`
    /// and `HR_MAILBOX` replace a department's mailbox, then `TICKET_ROUTES`
    /// (`Category=mailbox` pairs separated by commas) replaces single
    /// categories.
    pub fn from_env() -> Self {
        let mut routing = Self::defaults();
        if let Ok(it) = std::env::var("IT_MAILBOX") {
            routing.set_department(
                &[TicketCategory::PasswordReset, TicketCategory::AdminAccess],
                &it,
            );
        }
        if let Ok(finance) = std::env::var("FINANCE_MAILBOX") {
            routing.set_department(
                &[
                    TicketCategory::PayrollIssue,
                    TicketCategory::ExpenseReimbursement,
                ],
                &finance,
            );
        }
        if let Ok(hr) = std::env::var("HR_MAILBOX") {
            routing.set_department(
                &[
                    TicketCategory::LeaveRequest,
                    TicketCategory::EmployeeOnboarding,
                ],
                &hr,
            );
        }
        if let Ok(overrides) = std::env::var("TICKET_ROUTES") {
            for entry in overrides.split(',') {
                if let Some((category, mailbox)) = entry.split_once('=') {
                    let category = category.trim();
                    let mailbox = mailbox.trim();
                    if !category.is_empty() && !mailbox.is_empty() {
                        routing
                            .mailboxes
                            .insert(category.to_string(), mailbox.to_string());
                    }
                }
            }
        }
        routing
    }

    pub fn mailbox_for(&self, category: TicketCategory) -> Option<&str> {
        self.mailboxes.get(category.as_str()).map(String::as_str)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let server = ServerConfig {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            username: std::env::var("SMTP_USER").ok(),
            password: std::env::var("SMTP_PASS").ok(),
            from: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| "it-ticket-portal@example.com".to_string()),
        };

        let directory = match (
            std::env::var("DIRECTORY_AUTHORITY"),
            std::env::var("DIRECTORY_CLIENT_ID"),
            std::env::var("DIRECTORY_CLIENT_SECRET"),
        ) {
            (Ok(authority), Ok(client_id), Ok(client_secret)) => Some(DirectoryConfig {
                authority,
                client_id,
                client_secret,
                api_url: std::env::var("DIRECTORY_API_URL")
                    .unwrap_or_else(|_| "https://graph.microsoft.com".to_string()),
                timeout_secs: std::env::var("DIRECTORY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            }),
            _ => None,
        };

        let outbox = OutboxConfig {
            interval_secs: std::env::var("OUTBOX_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            max_attempts: std::env::var("OUTBOX_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            batch_size: std::env::var("OUTBOX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        };

        Ok(AppConfig {
            server,
            database_url: std::env::var("DATABASE_URL").ok(),
            smtp,
            directory,
            routing: DepartmentRouting::from_env(),
            outbox,
        })
    }
}
