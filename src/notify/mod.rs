pub mod outbox;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use uuid::Uuid;

use crate::config::SmtpConfig;
use crate::tickets::Ticket;

#[derive(Debug, Clone)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// A creation-time notification destined for the persisted outbox.
#[derive(Debug, Clone)]
pub struct QueuedMail {
    pub ticket_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address: {0}")]
    Address(String),
    #[error("Failed to build email: {0}")]
    Build(String),
    #[error("SMTP error: {0}")]
    Smtp(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &MailMessage) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    host: String,
    from: String,
    credentials: Option<(String, String)>,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            from: config.from.clone(),
            credentials: match (&config.username, &config.password) {
                (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
                _ => None,
            },
        }
    }

    fn transport(&self) -> Result<SmtpTransport, MailError> {
        let transport = if let Some((user, pass)) = &self.credentials {
            SmtpTransport::relay(&self.host)
                .map_err(|e| MailError::Smtp(e.to_string()))?
                .credentials(Credentials::new(user.clone(), pass.clone()))
                .build()
        } else {
            SmtpTransport::builder_dangerous(&self.host).build()
        };
        Ok(transport)
    }

    /// Startup connectivity check against the configured relay.
    pub async fn verify(&self) -> bool {
        let transport = match self.transport() {
            Ok(t) => t,
            Err(_) => return false,
        };
        tokio::task::spawn_blocking(move || transport.test_connection().unwrap_or(false))
            .await
            .unwrap_or(false)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &MailMessage) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                format!("\"IT Ticket Portal\" <{}>", self.from)
                    .parse()
                    .map_err(|e| MailError::Address(format!("from: {e}")))?,
            )
            .to(mail
                .to
                .parse()
                .map_err(|e| MailError::Address(format!("to: {e}")))?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        let transport = self.transport()?;
        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?
            .map_err(|e| MailError::Smtp(e.to_string()))?;
        Ok(())
    }
}

pub fn confirmation_mail(ticket: &Ticket) -> QueuedMail {
    QueuedMail {
        ticket_id: ticket.id,
        recipient: ticket.requester_email.clone(),
        subject: format!("Your ticket #{} has been created", ticket.ticket_number),
        body: format!(
            "Hello {},\n\n\
             Your support ticket has been successfully created.\n\n\
             Ticket Details:\n\
             - Ticket Number: {}\n\
             - Category: {}\n\
             - Priority: {}\n\
             - Description: {}\n\n\
             Our IT team will get back to you soon.\n\n\
             Regards,\nIT Support Team",
            ticket.requester_name,
            ticket.ticket_number,
            ticket.category.as_str(),
            ticket.priority.as_str(),
            ticket.description,
        ),
    }
}

pub fn department_mail(ticket: &Ticket, mailbox: &str) -> QueuedMail {
    QueuedMail {
        ticket_id: ticket.id,
        recipient: mailbox.to_string(),
        subject: format!(
            "[TICKET #{}] {}",
            ticket.ticket_number,
            ticket.category.as_str()
        ),
        body: format!(
            "New Support Ticket #{}\n\n\
             Created by: {}\n\
             Category: {}\n\
             Priority: {}\n\
             Description: {}\n\n\
             Reply to resolve.",
            ticket.ticket_number,
            ticket.requester_name,
            ticket.category.as_str(),
            ticket.priority.as_str(),
            ticket.description,
        ),
    }
}

pub fn reset_user_mail(ticket: &Ticket, password: &str) -> MailMessage {
    MailMessage {
        to: ticket.requester_email.clone(),
        subject: "Your password has been reset".to_string(),
        body: format!(
            "Hello {},\n\n\
             Your password has been reset.\n\
             New Password: {}\n\
             Please change it on next login.\n\n\
             Your ticket #{} has been closed.\n\n\
             Regards,\nIT Support Team",
            ticket.requester_name, password, ticket.ticket_number,
        ),
    }
}

pub fn reset_department_mail(ticket: &Ticket, password: &str, mailbox: &str) -> MailMessage {
    MailMessage {
        to: mailbox.to_string(),
        subject: format!("Password reset completed for {}", ticket.requester_name),
        body: format!(
            "The password for user {} has been successfully reset.\n\n\
             New Password: {}\n\n\
             Ticket #{} has been automatically closed.",
            ticket.requester_name, password, ticket.ticket_number,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::{TicketCategory, TicketPriority, TicketStatus};
    use chrono::Utc;

    fn sample_ticket() -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            ticket_number: 42,
            requester_id: "u1".to_string(),
            requester_name: "Alice".to_string(),
            requester_email: "alice@x.com".to_string(),
            category: TicketCategory::LeaveRequest,
            description: "PTO next week".to_string(),
            priority: TicketPriority::Low,
            status: TicketStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn confirmation_mail_addresses_the_requester() {
        let mail = confirmation_mail(&sample_ticket());
        assert_eq!(mail.recipient, "alice@x.com");
        assert_eq!(mail.subject, "Your ticket #42 has been created");
        assert!(mail.body.contains("Hello Alice"));
        assert!(mail.body.contains("- Ticket Number: 42"));
        assert!(mail.body.contains("- Category: Leave Request"));
    }

    #[test]
    fn department_mail_carries_ticket_summary() {
        let mail = department_mail(&sample_ticket(), "hr@example.com");
        assert_eq!(mail.recipient, "hr@example.com");
        assert_eq!(mail.subject, "[TICKET #42] Leave Request");
        assert!(mail.body.starts_with("New Support Ticket #42"));
        assert!(mail.body.contains("Created by: Alice"));
    }

    #[test]
    fn reset_mails_contain_the_password_exactly_once() {
        let ticket = sample_ticket();
        let user_mail = reset_user_mail(&ticket, "S3cret!Password");
        assert_eq!(user_mail.to, "alice@x.com");
        assert_eq!(user_mail.body.matches("S3cret!Password").count(), 1);
        assert!(user_mail.body.contains("ticket #42 has been closed"));

        let dept_mail = reset_department_mail(&ticket, "S3cret!Password", "it@example.com");
        assert_eq!(dept_mail.to, "it@example.com");
        assert_eq!(dept_mail.body.matches("S3cret!Password").count(), 1);
        assert!(dept_mail.body.contains("automatically closed"));
    }
}
