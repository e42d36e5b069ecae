//! Core domain types shared across the engine.
//!
//! All money and odds are `rust_decimal::Decimal`; the serde representation
//! is a decimal string, so persisted state never drifts through floats.

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Smallest stake the exchange will accept for a lay order.
pub const EXCHANGE_MIN_STAKE: Decimal = dec!(1.00);

/// Market lifecycle status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Open,
    Suspended,
    Closed,
}

/// A runner in a win market with its current best prices.
///
/// `sort_priority` ranks runners by lay price: 1 is the favourite
/// (shortest lay), 2 the second favourite. A runner with no lay price
/// is unpriced and sorts after every priced runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub selection_id: i64,
    pub name: String,
    pub sort_priority: u32,
    pub best_available_to_lay: Option<Decimal>,
    pub best_available_to_back: Option<Decimal>,
    #[serde(default)]
    pub last_price_traded: Option<Decimal>,
}

/// A win market as tracked by the engine. Runners are kept sorted by
/// `sort_priority` ascending; replacing the book replaces the whole list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub market_name: String,
    pub venue: String,
    pub country: String,
    pub race_time: DateTime<Utc>,
    pub status: MarketStatus,
    pub in_play: bool,
    pub runners: Vec<Runner>,
}

impl Market {
    pub fn favourite(&self) -> Option<&Runner> {
        self.runners.iter().find(|r| r.sort_priority == 1)
    }

    pub fn second_favourite(&self) -> Option<&Runner> {
        self.runners.iter().find(|r| r.sort_priority == 2)
    }

    /// Minutes until the off, to one decimal place. Negative once the race
    /// has started.
    pub fn minutes_to_off(&self, now: DateTime<Utc>) -> Decimal {
        minutes_between(now, self.race_time)
    }

    /// Replace this market's price view with a fresh book. The book's
    /// runner list is authoritative; names are carried over from the
    /// catalogue where known. Sort priorities are recomputed from lay
    /// prices, shortest first, unpriced runners last.
    pub fn apply_book(&mut self, book: &MarketBook) {
        let names: std::collections::HashMap<i64, String> = self
            .runners
            .iter()
            .map(|r| (r.selection_id, r.name.clone()))
            .collect();

        self.status = book.status;
        self.in_play = book.in_play;

        let mut runners: Vec<Runner> = book
            .runners
            .iter()
            .map(|b| Runner {
                selection_id: b.selection_id,
                name: names
                    .get(&b.selection_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Selection {}", b.selection_id)),
                sort_priority: 0,
                best_available_to_lay: b.best_available_to_lay,
                best_available_to_back: b.best_available_to_back,
                last_price_traded: b.last_price_traded,
            })
            .collect();

        runners.sort_by(|a, b| match (a.best_available_to_lay, b.best_available_to_lay) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.selection_id.cmp(&b.selection_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.selection_id.cmp(&b.selection_id),
        });
        for (i, r) in runners.iter_mut().enumerate() {
            r.sort_priority = (i + 1) as u32;
        }
        self.runners = runners;
    }
}

pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
    let secs = (to - from).num_seconds();
    (Decimal::from(secs) / dec!(60)).round_dp(1)
}

/// Current prices for one market, as returned by a book fetch. Runner
/// identity only; names live on the catalogued [`Market`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBook {
    pub market_id: String,
    pub status: MarketStatus,
    pub in_play: bool,
    pub runners: Vec<BookRunner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRunner {
    pub selection_id: i64,
    pub best_available_to_lay: Option<Decimal>,
    pub best_available_to_back: Option<Decimal>,
    pub last_price_traded: Option<Decimal>,
}

/// One price level of depth on a single side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Per-runner depth, up to three levels each side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerDepth {
    pub selection_id: i64,
    pub available_to_lay: Vec<PriceLevel>,
    pub available_to_back: Vec<PriceLevel>,
}

/// Full book view: best prices plus level-2/3 depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBookFull {
    pub book: MarketBook,
    pub depth: Vec<RunnerDepth>,
}

/// Race discipline inferred from the market name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discipline {
    Flat,
    Jumps,
    Unknown,
}

static JUMPS_RE: OnceLock<Regex> = OnceLock::new();
static FLAT_RE: OnceLock<Regex> = OnceLock::new();

impl Discipline {
    /// Classify from names like "16:05 R5 Hcap" or "14:30 2m Hrd".
    pub fn from_market_name(name: &str) -> Self {
        let jumps = JUMPS_RE
            .get_or_init(|| Regex::new(r"(?i)\b(hrd|hurdle|chs|chase|nhf|bumper)\b").unwrap());
        let flat = FLAT_RE.get_or_init(|| {
            Regex::new(r"(?i)\b(hcap|stks|stakes|mdn|maiden|nursery|claim|listed|grp\d?)\b")
                .unwrap()
        });
        if jumps.is_match(name) {
            Discipline::Jumps
        } else if flat.is_match(name) {
            Discipline::Flat
        } else {
            Discipline::Unknown
        }
    }
}

/// A point-in-time capture of runner prices while a market is monitored.
/// Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub minutes_to_off: Decimal,
    pub runners: Vec<SnapshotRunner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRunner {
    pub selection_id: i64,
    pub name: String,
    pub sort_priority: u32,
    pub best_available_to_lay: Option<Decimal>,
    pub best_available_to_back: Option<Decimal>,
}

/// Which stake rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleId {
    #[serde(rename = "RULE_1")]
    Rule1,
    #[serde(rename = "RULE_2")]
    Rule2,
    #[serde(rename = "RULE_3A")]
    Rule3a,
    #[serde(rename = "RULE_3B")]
    Rule3b,
    #[serde(rename = "NONE")]
    None,
}

/// A single lay order the evaluator wants placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetInstruction {
    pub market_id: String,
    pub selection_id: i64,
    pub runner_name: String,
    pub price: Decimal,
    pub size: Decimal,
    pub rule: RuleId,
}

impl BetInstruction {
    /// What we lose if the horse wins.
    pub fn liability(&self) -> Decimal {
        (self.size * (self.price - Decimal::ONE)).round_dp(2)
    }
}

/// Outcome status of a submitted (or simulated) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Success,
    Failure,
    DryRun,
}

/// The exchange's answer to a place-order call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub status: AckStatus,
    #[serde(default)]
    pub bet_id: Option<String>,
    #[serde(default)]
    pub size_matched: Option<Decimal>,
    #[serde(default)]
    pub avg_price_matched: Option<Decimal>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl OrderAck {
    pub fn dry_run() -> Self {
        Self {
            status: AckStatus::DryRun,
            bet_id: None,
            size_matched: None,
            avg_price_matched: None,
            error_code: None,
        }
    }

    pub fn failure(code: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Failure,
            bet_id: None,
            size_matched: None,
            avg_price_matched: None,
            error_code: Some(code.into()),
        }
    }
}

/// Append-only record of a bet attempt. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecord {
    pub market_id: String,
    pub selection_id: i64,
    pub runner_name: String,
    pub price: Decimal,
    pub size: Decimal,
    pub liability: Decimal,
    pub rule: RuleId,
    pub placed_at: DateTime<Utc>,
    pub venue: String,
    pub discipline: Discipline,
    pub race_time: DateTime<Utc>,
    pub dry_run: bool,
    pub exchange_response: OrderAck,
}

/// A settled bet from the cleared-orders endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedBet {
    pub bet_id: String,
    pub market_id: String,
    pub selection_id: i64,
    pub outcome: String,
    pub size_settled: Decimal,
    pub avg_price_matched: Decimal,
    pub commission: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Engine run mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Stopped,
    Crashed,
}

/// Per-rule bet tallies inside a session summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTally {
    pub rule_1: u32,
    pub rule_2: u32,
    pub rule_3a: u32,
    pub rule_3b: u32,
}

impl RuleTally {
    pub fn bump(&mut self, rule: RuleId) {
        match rule {
            RuleId::Rule1 => self.rule_1 += 1,
            RuleId::Rule2 => self.rule_2 += 1,
            RuleId::Rule3a => self.rule_3a += 1,
            RuleId::Rule3b => self.rule_3b += 1,
            RuleId::None => {}
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_bets: u32,
    pub total_stake: Decimal,
    pub total_liability: Decimal,
    pub markets_processed: u32,
    pub spread_rejections: u32,
    pub jofs_splits: u32,
    pub rules: RuleTally,
}

/// One operator session: from start() to stop() (or crash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub date: chrono::NaiveDate,
    pub mode: SessionMode,
    pub countries: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub summary: SessionSummary,
    /// Indices into the day's bet list.
    pub bets: Vec<usize>,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        now: DateTime<Utc>,
        date: chrono::NaiveDate,
        mode: SessionMode,
        countries: Vec<String>,
    ) -> Self {
        Self {
            session_id: format!("ses_{}", now.format("%Y%m%d_%H%M%S")),
            date,
            mode,
            countries,
            start_time: now,
            stop_time: None,
            status: SessionStatus::Running,
            summary: SessionSummary::default(),
            bets: Vec::new(),
            last_saved: None,
        }
    }
}

/// A recorded, operator-visible error. Bounded ring of 50 in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// An API key issued to an external consumer of the state surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: String,
    pub key: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn preview(&self) -> String {
        if self.key.len() > 12 {
            format!("{}...{}", &self.key[..8], &self.key[self.key.len() - 4..])
        } else {
            self.key.clone()
        }
    }
}

/// Pointer to an externally rendered report; the engine only keeps the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub report_id: String,
    pub date: chrono::NaiveDate,
    pub created_at: DateTime<Utc>,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Exchange price ticks
// ---------------------------------------------------------------------------

/// The minimum legal price increment for a given lay price.
pub fn tick_size(price: Decimal) -> Decimal {
    if price < dec!(2) {
        dec!(0.01)
    } else if price < dec!(3) {
        dec!(0.02)
    } else if price < dec!(4) {
        dec!(0.05)
    } else if price < dec!(6) {
        dec!(0.1)
    } else if price < dec!(10) {
        dec!(0.2)
    } else if price < dec!(20) {
        dec!(0.5)
    } else if price < dec!(30) {
        dec!(1)
    } else if price < dec!(50) {
        dec!(2)
    } else {
        dec!(5)
    }
}

/// Snap a price down onto the exchange tick grid. Prices coming off the
/// book are already on-tick; this guards the order path.
pub fn snap_to_tick(price: Decimal) -> Decimal {
    let tick = tick_size(price);
    (price / tick).floor() * tick
}

/// True when `other` is the same price as `reference` or within one tick of
/// it, measured with the tick of `reference`'s band.
pub fn within_one_tick(reference: Decimal, other: Decimal) -> bool {
    (other - reference).abs() <= tick_size(reference)
}
