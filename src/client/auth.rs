//! Exchange session management.
//!
//! Interactive SSO login with an app key. Session tokens live for about
//! four hours; within 30 minutes of expiry a keep-alive is attempted
//! before falling back to a fresh login.

use crate::config::ExchangeConfig;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

const SESSION_LIFETIME_HOURS: i64 = 4;
const REFRESH_MARGIN_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
struct SessionToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeepAliveResponse {
    #[serde(default)]
    status: Option<String>,
}

/// Shared login state for all exchange sub-clients.
pub struct ExchangeSession {
    http: reqwest::Client,
    config: ExchangeConfig,
    token: RwLock<Option<SessionToken>>,
    last_login_error: RwLock<Option<String>>,
}

impl ExchangeSession {
    pub fn new(http: reqwest::Client, config: ExchangeConfig) -> Self {
        Self {
            http,
            config,
            token: RwLock::new(None),
            last_login_error: RwLock::new(None),
        }
    }

    pub fn app_key(&self) -> &str {
        &self.config.app_key
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub async fn last_login_error(&self) -> Option<String> {
        self.last_login_error.read().await.clone()
    }

    /// Drop the cached token so the next call logs in again.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    /// Return a valid session token, refreshing or re-authenticating as
    /// needed.
    pub async fn ensure_session(&self) -> Result<String> {
        let now = Utc::now();
        {
            let guard = self.token.read().await;
            if let Some(tok) = guard.as_ref() {
                if now < tok.expires_at - Duration::minutes(REFRESH_MARGIN_MINUTES) {
                    return Ok(tok.token.clone());
                }
            }
        }

        // Near expiry: keep-alive extends the current token without a
        // credential round-trip.
        if self.keep_alive().await? {
            let guard = self.token.read().await;
            if let Some(tok) = guard.as_ref() {
                return Ok(tok.token.clone());
            }
        }

        self.login().await
    }

    pub async fn login(&self) -> Result<String> {
        tracing::info!("authenticating with exchange");
        let resp = self
            .http
            .post(&self.config.auth_url)
            .header("X-Application", &self.config.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Malformed(format!("login response: {e}")))?;

        if login.status.as_deref() != Some("SUCCESS") {
            let reason = login.error.unwrap_or_else(|| "unknown".to_string());
            *self.last_login_error.write().await = Some(reason.clone());
            *self.token.write().await = None;
            return Err(EngineError::Auth(format!("login failed: {reason}")));
        }

        let token = login
            .token
            .ok_or_else(|| EngineError::Malformed("login succeeded without token".into()))?;

        *self.token.write().await = Some(SessionToken {
            token: token.clone(),
            expires_at: Utc::now() + Duration::hours(SESSION_LIFETIME_HOURS),
        });
        *self.last_login_error.write().await = None;
        tracing::info!("exchange login successful");
        Ok(token)
    }

    /// Attempt to extend the current session. Returns true when the token
    /// was refreshed.
    async fn keep_alive(&self) -> Result<bool> {
        let token = {
            let guard = self.token.read().await;
            match guard.as_ref() {
                Some(tok) => tok.token.clone(),
                None => return Ok(false),
            }
        };

        let resp = self
            .http
            .post(&self.config.keepalive_url)
            .header("X-Application", &self.config.app_key)
            .header("X-Authentication", &token)
            .header("Accept", "application/json")
            .send()
            .await;

        let alive = match resp {
            Ok(r) => r
                .json::<KeepAliveResponse>()
                .await
                .map(|k| k.status.as_deref() == Some("SUCCESS"))
                .unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "keep-alive failed");
                false
            }
        };

        if alive {
            let mut guard = self.token.write().await;
            if let Some(tok) = guard.as_mut() {
                tok.expires_at = Utc::now() + Duration::hours(SESSION_LIFETIME_HOURS);
            }
        }
        Ok(alive)
    }
}
