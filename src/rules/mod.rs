//! Lay betting rule evaluation.
//!
//! Pure decision logic: given a market with a current book and the engine
//! configuration, produce the lay instructions to place (or a skip with a
//! machine-readable reason). The same inputs always yield the same
//! decision; no clock, no I/O, no state.
//!
//! Decision order (first match wins):
//! 1. in-play or non-open market → skip
//! 2. favourite unpriced / above the max-odds guard → skip
//! 3. favourite below the min-odds guard → skip
//! 4. stake rule by favourite's lay price band
//! 5. spread gate (optional) per instruction
//! 6. joint-favourite split (optional) on the favourite's stake

use crate::config::EngineConfig;
use crate::types::{
    within_one_tick, BetInstruction, Market, MarketStatus, RuleId, Runner, EXCHANGE_MIN_STAKE,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Base stakes in points, multiplied by the configured point value.
const RULE_1_POINTS: Decimal = dec!(3);
const RULE_2_POINTS: Decimal = dec!(2);
const RULE_3_POINTS: Decimal = dec!(1);

/// Gap to the second favourite below which rule 3 lays both runners.
const RULE_3_GAP: Decimal = dec!(2.0);

/// A compact view of a runner for the decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerView {
    pub selection_id: i64,
    pub name: String,
    pub odds: Decimal,
}

impl RunnerView {
    fn of(runner: &Runner, odds: Decimal) -> Self {
        Self {
            selection_id: runner.selection_id,
            name: runner.name.clone(),
            odds,
        }
    }
}

/// Why an instruction was dropped by the spread gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadRejection {
    pub selection_id: i64,
    pub runner_name: String,
    pub lay_price: Decimal,
    pub back_price: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub max_spread: Option<Decimal>,
    pub reason: String,
}

/// The outcome of evaluating one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecision {
    pub market_id: String,
    pub market_name: String,
    pub venue: String,
    pub race_time: DateTime<Utc>,
    pub rule: RuleId,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub instructions: Vec<BetInstruction>,
    pub favourite: Option<RunnerView>,
    pub second_favourite: Option<RunnerView>,
    pub spread_rejections: Vec<SpreadRejection>,
    pub jofs_split: bool,
}

impl RuleDecision {
    fn skip(market: &Market, reason: &str) -> Self {
        Self {
            market_id: market.market_id.clone(),
            market_name: market.market_name.clone(),
            venue: market.venue.clone(),
            race_time: market.race_time,
            rule: RuleId::None,
            skipped: true,
            skip_reason: Some(reason.to_string()),
            instructions: Vec::new(),
            favourite: None,
            second_favourite: None,
            spread_rejections: Vec::new(),
            jofs_split: false,
        }
    }

    pub fn total_stake(&self) -> Decimal {
        self.instructions.iter().map(|i| i.size).sum()
    }

    pub fn total_liability(&self) -> Decimal {
        self.instructions.iter().map(|i| i.liability()).sum()
    }
}

/// A recorded evaluation: the decision plus when it ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub evaluated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub decision: RuleDecision,
}

/// Evaluate the rule set against a market's current book.
pub fn apply_rules(market: &Market, config: &EngineConfig) -> RuleDecision {
    if market.in_play || market.status != MarketStatus::Open {
        return RuleDecision::skip(market, "in_play_or_closed");
    }

    let favourite = match market.favourite() {
        Some(r) => r,
        None => return RuleDecision::skip(market, "no_price"),
    };
    let fav_odds = match favourite.best_available_to_lay {
        Some(odds) => odds,
        None => return RuleDecision::skip(market, "no_price"),
    };

    if fav_odds > config.max_lay_odds {
        let mut decision = RuleDecision::skip(market, "max_odds_exceeded");
        decision.favourite = Some(RunnerView::of(favourite, fav_odds));
        return decision;
    }
    if fav_odds < config.min_odds {
        let mut decision = RuleDecision::skip(market, "below_min_odds");
        decision.favourite = Some(RunnerView::of(favourite, fav_odds));
        return decision;
    }

    let second = market
        .second_favourite()
        .and_then(|r| r.best_available_to_lay.map(|odds| (r, odds)));

    let mut decision = RuleDecision {
        market_id: market.market_id.clone(),
        market_name: market.market_name.clone(),
        venue: market.venue.clone(),
        race_time: market.race_time,
        rule: RuleId::None,
        skipped: false,
        skip_reason: None,
        instructions: Vec::new(),
        favourite: Some(RunnerView::of(favourite, fav_odds)),
        second_favourite: second.map(|(r, odds)| RunnerView::of(r, odds)),
        spread_rejections: Vec::new(),
        jofs_split: false,
    };

    let lay = |runner: &Runner, odds: Decimal, points: Decimal, rule: RuleId| BetInstruction {
        market_id: market.market_id.clone(),
        selection_id: runner.selection_id,
        runner_name: runner.name.clone(),
        price: odds,
        size: stake(points, config.point_value),
        rule,
    };

    // Bands are left-inclusive: 2.0 and 5.0 both land in rule 2.
    if fav_odds < dec!(2.0) {
        decision.rule = RuleId::Rule1;
        decision
            .instructions
            .push(lay(favourite, fav_odds, RULE_1_POINTS, RuleId::Rule1));
    } else if fav_odds <= dec!(5.0) {
        decision.rule = RuleId::Rule2;
        decision
            .instructions
            .push(lay(favourite, fav_odds, RULE_2_POINTS, RuleId::Rule2));
    } else {
        match second {
            Some((second_runner, second_odds)) if second_odds - fav_odds < RULE_3_GAP => {
                decision.rule = RuleId::Rule3a;
                decision
                    .instructions
                    .push(lay(favourite, fav_odds, RULE_3_POINTS, RuleId::Rule3a));
                decision.instructions.push(lay(
                    second_runner,
                    second_odds,
                    RULE_3_POINTS,
                    RuleId::Rule3a,
                ));
            }
            _ => {
                decision.rule = RuleId::Rule3b;
                decision
                    .instructions
                    .push(lay(favourite, fav_odds, RULE_3_POINTS, RuleId::Rule3b));
            }
        }
    }

    if config.spread_control_enabled {
        apply_spread_gate(market, &mut decision);
        if decision.instructions.is_empty() {
            decision.skipped = true;
            decision.skip_reason = Some("spread".to_string());
            return decision;
        }
    }

    if config.jofs_enabled {
        apply_jofs_split(market, favourite, fav_odds, &mut decision);
    }

    decision
}

fn stake(points: Decimal, point_value: Decimal) -> Decimal {
    (points * point_value).round_dp(2).max(EXCHANGE_MIN_STAKE)
}

// ---------------------------------------------------------------------------
// Spread gate
// ---------------------------------------------------------------------------

/// Maximum acceptable lay−back spread per lay-price band. `None` means the
/// band is rejected outright (too volatile to trust the displayed price).
pub fn spread_threshold(lay: Decimal) -> Option<Decimal> {
    if lay < dec!(2.0) {
        Some(dec!(0.05))
    } else if lay < dec!(3.0) {
        Some(dec!(0.15))
    } else if lay < dec!(5.0) {
        Some(dec!(0.30))
    } else if lay < dec!(8.0) {
        Some(dec!(0.50))
    } else {
        None
    }
}

fn apply_spread_gate(market: &Market, decision: &mut RuleDecision) {
    let mut kept = Vec::with_capacity(decision.instructions.len());
    for instruction in decision.instructions.drain(..) {
        let back = market
            .runners
            .iter()
            .find(|r| r.selection_id == instruction.selection_id)
            .and_then(|r| r.best_available_to_back);
        let lay = instruction.price;

        let rejection = match (back, spread_threshold(lay)) {
            (None, _) => Some(SpreadRejection {
                selection_id: instruction.selection_id,
                runner_name: instruction.runner_name.clone(),
                lay_price: lay,
                back_price: None,
                spread: None,
                max_spread: spread_threshold(lay),
                reason: "no back price, insufficient depth".to_string(),
            }),
            (Some(back), None) => Some(SpreadRejection {
                selection_id: instruction.selection_id,
                runner_name: instruction.runner_name.clone(),
                lay_price: lay,
                back_price: Some(back),
                spread: Some(lay - back),
                max_spread: None,
                reason: format!("lay odds {lay} in reject band"),
            }),
            (Some(back), Some(max)) if lay - back > max => Some(SpreadRejection {
                selection_id: instruction.selection_id,
                runner_name: instruction.runner_name.clone(),
                lay_price: lay,
                back_price: Some(back),
                spread: Some(lay - back),
                max_spread: Some(max),
                reason: format!("spread {} exceeds max {} for odds {}", lay - back, max, lay),
            }),
            _ => None,
        };

        match rejection {
            Some(r) => decision.spread_rejections.push(r),
            None => kept.push(instruction),
        }
    }
    decision.instructions = kept;
}

// ---------------------------------------------------------------------------
// Joint/close-odds favourite split
// ---------------------------------------------------------------------------

/// Split the favourite's stake across every runner priced level with it or
/// within one tick. Only applies when the rule's sole target is the
/// favourite; rule 3A already spreads stake over two runners.
fn apply_jofs_split(
    market: &Market,
    favourite: &Runner,
    fav_odds: Decimal,
    decision: &mut RuleDecision,
) {
    if !matches!(decision.rule, RuleId::Rule1 | RuleId::Rule2 | RuleId::Rule3b) {
        return;
    }
    let fav_index = match decision
        .instructions
        .iter()
        .position(|i| i.selection_id == favourite.selection_id)
    {
        Some(i) => i,
        None => return, // favourite dropped by the spread gate
    };

    let peers: Vec<(&Runner, Decimal)> = market
        .runners
        .iter()
        .filter_map(|r| r.best_available_to_lay.map(|odds| (r, odds)))
        .filter(|(_, odds)| *odds == fav_odds || within_one_tick(fav_odds, *odds))
        .collect();
    if peers.len() < 2 {
        return;
    }

    let total = decision.instructions[fav_index].size;
    let share = (total / Decimal::from(peers.len()))
        .round_dp_with_strategy(2, RoundingStrategy::ToZero);
    if share < EXCHANGE_MIN_STAKE {
        // Splitting would fall below the exchange minimum; lay the
        // favourite alone instead.
        return;
    }

    let rule = decision.rule;
    let template = decision.instructions.remove(fav_index);
    for (runner, odds) in peers {
        decision.instructions.push(BetInstruction {
            market_id: template.market_id.clone(),
            selection_id: runner.selection_id,
            runner_name: runner.name.clone(),
            price: odds,
            size: share,
            rule,
        });
    }
    decision.jofs_split = true;
}
