//! Exchange API client.
//!
//! Typed wrapper over the exchange's JSON-RPC betting surface plus the
//! SSO session endpoints. Split into market/order operations (`betting`),
//! account queries (`account`), and session management (`auth`).

pub mod account;
pub mod auth;
pub mod betting;

pub use account::AccountClient;
pub use auth::ExchangeSession;
pub use betting::BettingClient;

use crate::config::ExchangeConfig;
use crate::error::{EngineError, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Per-request timeout on every exchange call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff schedule for transient failures.
const RETRY_BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// Facade bundling the exchange sub-clients behind one shared session.
#[derive(Clone)]
pub struct ExchangeClient {
    pub session: Arc<ExchangeSession>,
    pub betting: BettingClient,
    pub account: Arc<AccountClient>,
}

impl ExchangeClient {
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Http(format!("failed to build http client: {e}")))?;

        let session = Arc::new(ExchangeSession::new(http.clone(), config.clone()));
        let betting = BettingClient::new(
            RpcTransport::new(http.clone(), session.clone(), config.api_url.clone()),
        );
        let account = Arc::new(AccountClient::new(RpcTransport::new(
            http,
            session.clone(),
            config.account_url.clone(),
        )));

        Ok(Self {
            session,
            betting,
            account,
        })
    }
}

/// JSON-RPC transport with the retry ladder: three attempts at 1s/2s/4s for
/// transient failures only. Auth errors surface immediately.
#[derive(Clone)]
pub struct RpcTransport {
    http: reqwest::Client,
    session: Arc<ExchangeSession>,
    url: String,
}

impl RpcTransport {
    pub fn new(http: reqwest::Client, session: Arc<ExchangeSession>, url: String) -> Self {
        Self { http, session, url }
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let mut last_err = None;
        for (attempt, backoff) in RETRY_BACKOFF_SECS.iter().enumerate() {
            match self.call_once(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::warn!(method, attempt, error = %e, "transient exchange error, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs(*backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::Http("retries exhausted".into())))
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let token = self.session.ensure_session().await?;
        let payload = serde_json::json!([{
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        }]);

        let resp = self
            .http
            .post(&self.url)
            .header("X-Application", self.session.app_key())
            .header("X-Authentication", &token)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.session.invalidate().await;
            return Err(EngineError::Auth("session rejected by exchange".into()));
        }
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimit(format!("{} rate limited", method)));
        }
        if status.is_server_error() {
            return Err(EngineError::Http(format!("{} returned {}", method, status)));
        }
        if !status.is_success() {
            return Err(EngineError::Exchange(format!("{} returned {}", method, status)));
        }

        let body: serde_json::Value = resp.json().await?;
        let first = body
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| EngineError::Malformed(format!("{}: empty rpc envelope", method)))?;

        if let Some(err) = first.get("error") {
            // INVALID_SESSION_INFORMATION arrives as an APING error, not a 401
            let text = err.to_string();
            if text.contains("INVALID_SESSION") || text.contains("NO_SESSION") {
                self.session.invalidate().await;
                return Err(EngineError::Auth(text));
            }
            return Err(EngineError::Exchange(format!("{}: {}", method, text)));
        }

        let result = first
            .get("result")
            .cloned()
            .ok_or_else(|| EngineError::Malformed(format!("{}: missing result", method)))?;
        serde_json::from_value(result)
            .map_err(|e| EngineError::Malformed(format!("{}: {}", method, e)))
    }
}
