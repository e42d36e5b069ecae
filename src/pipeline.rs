//! Bet submission pipeline.
//!
//! Takes the instructions from a rule decision and pushes them through
//! dedup and (in live mode) the exchange, one at a time, in the order the
//! scheduler hands them over. Dedup keys are inserted before the network
//! call; a recoverable exchange failure releases them so a later tick can
//! retry, anything else keeps them so a rejected bet is never re-fired.

use crate::engine::{is_recoverable_order_error, Engine};
use crate::error::{EngineError, Result};
use crate::rules::RuleDecision;
use crate::types::{AckStatus, BetRecord, Discipline, Market, OrderAck};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Seam for order placement so the pipeline is testable without a network.
#[async_trait]
pub trait BetSubmitter: Send + Sync {
    async fn submit_lay(
        &self,
        market_id: &str,
        selection_id: i64,
        size: Decimal,
        price: Decimal,
    ) -> Result<OrderAck>;
}

/// Live submitter backed by the exchange client.
pub struct ExchangeSubmitter {
    pub betting: crate::client::BettingClient,
}

#[async_trait]
impl BetSubmitter for ExchangeSubmitter {
    async fn submit_lay(
        &self,
        market_id: &str,
        selection_id: i64,
        size: Decimal,
        price: Decimal,
    ) -> Result<OrderAck> {
        self.betting
            .submit_lay(market_id, selection_id, size, price, 0)
            .await
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineOutcome {
    pub placed: usize,
    pub duplicates: usize,
    pub failures: usize,
}

impl PipelineOutcome {
    /// Any bet attempt at all happened (success, failure, or dry run).
    pub fn attempted(&self) -> bool {
        self.placed > 0 || self.failures > 0
    }
}

/// Submit every instruction of a decision serially. The caller holds the
/// engine lock for the whole call, so dedup sets observe each submission
/// before the next instruction is considered.
pub async fn submit_instructions(
    engine: &mut Engine,
    submitter: &dyn BetSubmitter,
    market: &Market,
    decision: &RuleDecision,
    now: DateTime<Utc>,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome::default();
    let dry_run = engine.config.dry_run;
    let discipline = Discipline::from_market_name(&market.market_name);

    for instruction in &decision.instructions {
        let runner_key = (instruction.runner_name.clone(), market.race_time);
        let selection_key = (instruction.selection_id, market.market_id.clone());

        if engine.dedup_runners.contains(&runner_key)
            || engine.dedup_selections.contains(&selection_key)
        {
            tracing::info!(
                runner = %instruction.runner_name,
                market = %market.market_id,
                "DUPLICATE: already bet on this runner or selection today"
            );
            outcome.duplicates += 1;
            continue;
        }

        // Optimistic insert: keys go in before the network call so a crash
        // after submission cannot double-bet on restart.
        engine.dedup_runners.insert(runner_key.clone());
        engine.dedup_selections.insert(selection_key.clone());

        let ack = if dry_run {
            OrderAck::dry_run()
        } else {
            match submitter
                .submit_lay(
                    &instruction.market_id,
                    instruction.selection_id,
                    instruction.size,
                    instruction.price,
                )
                .await
            {
                Ok(ack) => ack,
                Err(e) => OrderAck::failure(transport_error_code(&e)),
            }
        };

        match ack.status {
            AckStatus::Failure => {
                outcome.failures += 1;
                let code = ack.error_code.clone().unwrap_or_else(|| "UNKNOWN".into());
                if is_recoverable_order_error(&code) {
                    engine.dedup_runners.remove(&runner_key);
                    engine.dedup_selections.remove(&selection_key);
                }
                engine.record_error(
                    now,
                    format!("bet failed on {}: {}", instruction.runner_name, code),
                );
                tracing::warn!(runner = %instruction.runner_name, %code, "bet failed");
            }
            AckStatus::Success | AckStatus::DryRun => {
                outcome.placed += 1;
                tracing::info!(
                    dry_run,
                    runner = %instruction.runner_name,
                    price = %instruction.price,
                    size = %instruction.size,
                    liability = %instruction.liability(),
                    rule = ?instruction.rule,
                    "lay placed"
                );
            }
        }

        engine.record_bet(BetRecord {
            market_id: instruction.market_id.clone(),
            selection_id: instruction.selection_id,
            runner_name: instruction.runner_name.clone(),
            price: instruction.price,
            size: instruction.size,
            liability: instruction.liability(),
            rule: instruction.rule,
            placed_at: now,
            venue: market.venue.clone(),
            discipline,
            race_time: market.race_time,
            dry_run,
            exchange_response: ack,
        });
    }

    outcome
}

fn transport_error_code(error: &EngineError) -> String {
    match error {
        EngineError::Timeout(_) => "TIMEOUT".to_string(),
        EngineError::Http(_) => "EXCHANGE_UNAVAILABLE".to_string(),
        EngineError::RateLimit(_) => "SERVICE_BUSY".to_string(),
        EngineError::Auth(_) => "INVALID_SESSION_INFORMATION".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}
