use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DirectoryConfig;

/// Saga state for one ticket's password-reset attempt. Persisted so an
/// operator can see whether a reset actually ran before re-triggering one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetState {
    Pending,
    Completed,
    Failed,
}

impl ResetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetState::Pending => "pending",
            ResetState::Completed => "completed",
            ResetState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResetState::Pending),
            "completed" => Some(ResetState::Completed),
            "failed" => Some(ResetState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResetSagaRecord {
    pub ticket_id: Uuid,
    pub state: ResetState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Token request failed: {0}")]
    Token(String),
    #[error("Directory request failed: {0}")]
    Http(reqwest::Error),
    #[error("Directory request timed out after {0}s")]
    Timeout(u64),
    #[error("Directory API error (HTTP {status}): {detail}")]
    Api { status: u16, detail: String },
}

/// Client for the identity provider's Graph-style API: a client-credentials
/// token grant followed by a PATCH password mutation. The token fetch and
/// the mutation together run under one `timeout_secs` bound.
#[derive(Clone)]
pub struct GraphClient {
    config: DirectoryConfig,
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new(config: DirectoryConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(DirectoryError::Http)?;
        Ok(Self { config, http })
    }

    fn request_err(&self, e: reqwest::Error) -> DirectoryError {
        if e.is_timeout() {
            DirectoryError::Timeout(self.config.timeout_secs)
        } else {
            DirectoryError::Http(e)
        }
    }

    /// Fetch a fresh service credential. No caching: each reset is a
    /// one-shot saga, so a stale cached token would only add a failure mode.
    async fn fetch_token(&self) -> Result<String, DirectoryError> {
        let url = format!("{}/oauth2/v2.0/token", self.config.authority);
        let scope = format!("{}/.default", self.config.api_url);
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| self.request_err(e))?;
        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                DirectoryError::Timeout(self.config.timeout_secs)
            } else {
                DirectoryError::Token(format!("unreadable token response: {e}"))
            }
        })?;

        if !status.is_success() {
            return Err(DirectoryError::Token(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        body.get("access_token")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| DirectoryError::Token("no access_token in response".to_string()))
    }

    /// Set a newly generated password on the target account, flagging
    /// "must change at next sign-in". Returns the plaintext password; the
    /// caller is responsible for never persisting or logging it.
    pub async fn reset_password(&self, user_id: &str) -> Result<String, DirectoryError> {
        let limit = std::time::Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(limit, self.run_reset(user_id)).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(self.config.timeout_secs)),
        }
    }

    async fn run_reset(&self, user_id: &str) -> Result<String, DirectoryError> {
        let token = self.fetch_token().await?;
        let password = generate_password(16);

        let url = format!("{}/v1.0/users/{}", self.config.api_url, user_id);
        let body = serde_json::json!({
            "passwordProfile": {
                "forceChangePasswordNextSignIn": true,
                "password": password,
            }
        });

        let response = self
            .http
            .patch(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_err(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(password)
    }
}

/// Generate a random password with a 16-character floor and at least one
/// character from each required class, positions shuffled.
pub fn generate_password(length: usize) -> String {
    use rand::Rng;

    const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"0123456789";
    const SPECIAL: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

    let length = length.max(16);
    let mut rng = rand::rng();
    let mut password = Vec::with_capacity(length);

    password.push(UPPERCASE[rng.random_range(0..UPPERCASE.len())]);
    password.push(LOWERCASE[rng.random_range(0..LOWERCASE.len())]);
    password.push(DIGITS[rng.random_range(0..DIGITS.len())]);
    password.push(SPECIAL[rng.random_range(0..SPECIAL.len())]);

    let all_chars: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, SPECIAL].concat();
    for _ in 4..length {
        password.push(all_chars[rng.random_range(0..all_chars.len())]);
    }

    for i in (1..password.len()).rev() {
        let j = rng.random_range(0..=i);
        password.swap(i, j);
    }

    String::from_utf8(password).unwrap_or_else(|_| generate_password(length))
}
