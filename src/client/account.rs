//! Account queries.

use crate::client::RpcTransport;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Balance cache lifetime; the funds endpoint is aggressively rate limited.
const BALANCE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountFunds {
    #[serde(default)]
    available_to_bet_balance: Option<Decimal>,
}

#[derive(Clone, Copy)]
struct CachedBalance {
    balance: Decimal,
    fetched_at: Instant,
}

pub struct AccountClient {
    rpc: RpcTransport,
    cache: RwLock<Option<CachedBalance>>,
}

impl AccountClient {
    pub fn new(rpc: RpcTransport) -> Self {
        Self {
            rpc,
            cache: RwLock::new(None),
        }
    }

    /// Available-to-bet balance, cached for 30 seconds.
    pub async fn get_balance(&self) -> Result<Decimal> {
        if let Some(cached) = *self.cache.read().await {
            if cached.fetched_at.elapsed() < BALANCE_TTL {
                return Ok(cached.balance);
            }
        }

        let funds: AccountFunds = self
            .rpc
            .call("AccountAPING/v1.0/getAccountFunds", serde_json::json!({}))
            .await?;
        let balance = funds.available_to_bet_balance.unwrap_or(Decimal::ZERO);

        *self.cache.write().await = Some(CachedBalance {
            balance,
            fetched_at: Instant::now(),
        });
        Ok(balance)
    }

    /// Seconds since the cached balance was fetched, if any.
    pub async fn balance_age_secs(&self) -> Option<u64> {
        self.cache
            .read()
            .await
            .map(|c| c.fetched_at.elapsed().as_secs())
    }
}
