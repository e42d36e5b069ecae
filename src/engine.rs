//! Engine state: the single owner of everything the scheduler mutates.
//!
//! One `Engine` value exists per process, held behind a mutex by the
//! control surface. The scheduler task is the only writer during a tick;
//! control operations take the same lock and therefore apply between
//! ticks, never mid-tick.

use crate::config::EngineConfig;
use crate::rules::RuleEvaluation;
use crate::tracker::{MarketTracker, TrackerState};
use crate::types::{
    ApiKey, BetRecord, ErrorEntry, ReportEntry, RuleId, Session, SessionMode, SessionStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Ring bounds.
pub const MAX_EVALUATIONS: usize = 500;
pub const MAX_ERRORS: usize = 50;
/// How many records the UI snapshot exposes.
pub const SNAPSHOT_RECENT: usize = 200;
/// Completed sessions kept in the persisted index.
pub const SESSIONS_KEPT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    Stopped,
    Starting,
    Running,
    AuthFailed,
}

/// The nearest upcoming race, published for the operator UI.
#[derive(Debug, Clone, Serialize)]
pub struct NextRace {
    pub market_id: String,
    pub venue: String,
    pub market_name: String,
    pub race_time: DateTime<Utc>,
    pub minutes_to_off: Decimal,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrackersSummary {
    pub total: usize,
    pub discovered: usize,
    pub monitoring: usize,
    pub in_window: usize,
    pub processed: usize,
    pub expired: usize,
    pub skipped: usize,
}

pub struct Engine {
    pub config: EngineConfig,
    pub status: EngineStatus,
    pub day: NaiveDate,
    pub trackers: BTreeMap<String, MarketTracker>,
    pub bets_today: Vec<BetRecord>,
    pub evaluations: VecDeque<RuleEvaluation>,
    pub dedup_runners: HashSet<(String, DateTime<Utc>)>,
    pub dedup_selections: HashSet<(i64, String)>,
    pub sessions: Vec<Session>,
    pub errors: VecDeque<ErrorEntry>,
    pub api_keys: Vec<ApiKey>,
    pub reports_index: Vec<ReportEntry>,
    pub balance: Option<Decimal>,
    pub balance_age_secs: Option<u64>,
    pub last_scan: Option<DateTime<Utc>>,
    pub last_universe_refresh: Option<DateTime<Utc>>,
    pub last_flush: Option<DateTime<Utc>>,
    pub next_race: Option<NextRace>,
}

impl Engine {
    pub fn new(config: EngineConfig, day: NaiveDate) -> Self {
        Self {
            config,
            status: EngineStatus::Stopped,
            day,
            trackers: BTreeMap::new(),
            bets_today: Vec::new(),
            evaluations: VecDeque::new(),
            dedup_runners: HashSet::new(),
            dedup_selections: HashSet::new(),
            sessions: Vec::new(),
            errors: VecDeque::new(),
            api_keys: Vec::new(),
            reports_index: Vec::new(),
            balance: None,
            balance_age_secs: None,
            last_scan: None,
            last_universe_refresh: None,
            last_flush: None,
            next_race: None,
        }
    }

    // -- Sessions ----------------------------------------------------------

    pub fn current_session(&self) -> Option<&Session> {
        self.sessions
            .iter()
            .rev()
            .find(|s| s.status == SessionStatus::Running)
    }

    pub fn current_session_mut(&mut self) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .rev()
            .find(|s| s.status == SessionStatus::Running)
    }

    /// Open a session for today. No-op when one is already running.
    pub fn start_session(&mut self, now: DateTime<Utc>) {
        if self.current_session().is_some() {
            return;
        }
        let mode = if self.config.dry_run {
            SessionMode::DryRun
        } else {
            SessionMode::Live
        };
        self.sessions.push(Session::new(
            now,
            self.day,
            mode,
            self.config.countries.clone(),
        ));
        if self.sessions.len() > SESSIONS_KEPT {
            let excess = self.sessions.len() - SESSIONS_KEPT;
            self.sessions.drain(..excess);
        }
    }

    pub fn close_session(&mut self, now: DateTime<Utc>, status: SessionStatus) {
        if let Some(session) = self.current_session_mut() {
            session.status = status;
            session.stop_time = Some(now);
        }
    }

    // -- Day rollover and reset --------------------------------------------

    /// Reset the day-scoped state when the local trading date changes.
    /// The running session (if any) is closed as STOPPED and a fresh one
    /// opened against the new date. Returns true when a rollover happened.
    pub fn check_rollover(&mut self, today: NaiveDate, now: DateTime<Utc>) -> bool {
        if today == self.day {
            return false;
        }
        tracing::info!(from = %self.day, to = %today, "trading day rollover");
        let was_running = self.current_session().is_some();
        self.close_session(now, SessionStatus::Stopped);

        self.trackers.clear();
        self.bets_today.clear();
        self.evaluations.clear();
        self.dedup_runners.clear();
        self.dedup_selections.clear();
        self.errors.clear();
        self.next_race = None;
        self.last_universe_refresh = None;
        self.day = today;

        if was_running {
            self.start_session(now);
        }
        true
    }

    /// Operator reset: clear today's bets, evaluations, dedup sets, and
    /// trackers so every market gets re-processed. The session stays open
    /// with a zeroed summary.
    pub fn reset_bets(&mut self) {
        self.bets_today.clear();
        self.evaluations.clear();
        self.dedup_runners.clear();
        self.dedup_selections.clear();
        self.trackers.clear();
        self.next_race = None;
        self.last_universe_refresh = None;
        if let Some(session) = self.current_session_mut() {
            session.bets.clear();
            session.summary = Default::default();
        }
        tracing::info!("bets and processed markets cleared, all markets will re-process");
    }

    // -- Recording ----------------------------------------------------------

    pub fn record_error(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "engine error recorded");
        if self.errors.len() >= MAX_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorEntry { at: now, message });
    }

    pub fn record_evaluation(&mut self, evaluation: RuleEvaluation) {
        if self.evaluations.len() >= MAX_EVALUATIONS {
            self.evaluations.pop_front();
        }
        if let Some(session) = self.current_session_mut() {
            session.summary.spread_rejections +=
                evaluation.decision.spread_rejections.len() as u32;
            if evaluation.decision.jofs_split {
                session.summary.jofs_splits += 1;
            }
        }
        self.evaluations.push_back(evaluation);
    }

    /// Append a bet record and fold it into the running session's summary.
    pub fn record_bet(&mut self, record: BetRecord) {
        let index = self.bets_today.len();
        let stake = record.size;
        let liability = record.liability;
        let rule = record.rule;
        self.bets_today.push(record);

        if let Some(session) = self.current_session_mut() {
            session.bets.push(index);
            session.summary.total_bets += 1;
            session.summary.total_stake += stake;
            session.summary.total_liability += liability;
            session.summary.rules.bump(rule);
        }
    }

    pub fn record_market_processed(&mut self) {
        if let Some(session) = self.current_session_mut() {
            session.summary.markets_processed += 1;
        }
    }

    // -- API keys ------------------------------------------------------------

    pub fn generate_api_key(&mut self, label: &str, now: DateTime<Utc>) -> ApiKey {
        let key = ApiKey {
            key_id: uuid::Uuid::new_v4().simple().to_string()[..16].to_string(),
            key: format!("lay_{}", uuid::Uuid::new_v4().simple()),
            label: if label.is_empty() {
                "Untitled".to_string()
            } else {
                label.to_string()
            },
            created_at: now,
            last_used: None,
        };
        self.api_keys.push(key.clone());
        key
    }

    pub fn revoke_api_key(&mut self, key_id: &str) -> bool {
        let before = self.api_keys.len();
        self.api_keys.retain(|k| k.key_id != key_id);
        self.api_keys.len() < before
    }

    pub fn validate_api_key(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        for k in self.api_keys.iter_mut() {
            if k.key == key {
                k.last_used = Some(now);
                return true;
            }
        }
        false
    }

    // -- Snapshots ------------------------------------------------------------

    pub fn trackers_summary(&self) -> TrackersSummary {
        let mut summary = TrackersSummary {
            total: self.trackers.len(),
            ..Default::default()
        };
        for tracker in self.trackers.values() {
            match tracker.state {
                TrackerState::Discovered => summary.discovered += 1,
                TrackerState::Monitoring => summary.monitoring += 1,
                TrackerState::InWindow => summary.in_window += 1,
                TrackerState::Processed => summary.processed += 1,
                TrackerState::Expired => summary.expired += 1,
                TrackerState::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// Recompute the nearest active market for the UI.
    pub fn update_next_race(&mut self, now: DateTime<Utc>) {
        self.next_race = self
            .trackers
            .values()
            .filter(|t| {
                matches!(
                    t.state,
                    TrackerState::Discovered | TrackerState::Monitoring | TrackerState::InWindow
                ) && t.market.race_time > now
            })
            .min_by_key(|t| (t.market.race_time, t.market.market_id.clone()))
            .map(|t| NextRace {
                market_id: t.market.market_id.clone(),
                venue: t.market.venue.clone(),
                market_name: t.market.market_name.clone(),
                race_time: t.market.race_time,
                minutes_to_off: t.market.minutes_to_off(now),
            });
    }

    /// The state view consumed by the operator UI.
    pub fn snapshot(&self) -> StateSnapshot {
        let session = self.current_session();
        StateSnapshot {
            status: self.status,
            dry_run: self.config.dry_run,
            date: self.day,
            session_id: session.map(|s| s.session_id.clone()),
            session_start: session.map(|s| s.start_time),
            countries: self.config.countries.clone(),
            config: self.config.clone(),
            balance: self.balance,
            balance_age_seconds: self.balance_age_secs,
            last_scan: self.last_scan,
            summary: session.map(|s| s.summary.clone()).unwrap_or_default(),
            next_race: self.next_race.clone(),
            recent_bets: self
                .bets_today
                .iter()
                .rev()
                .take(SNAPSHOT_RECENT)
                .cloned()
                .collect(),
            recent_results: self
                .evaluations
                .iter()
                .rev()
                .take(SNAPSHOT_RECENT)
                .cloned()
                .collect(),
            errors: self.errors.iter().cloned().collect(),
            trackers_summary: self.trackers_summary(),
        }
    }

    /// Rule distribution over today's bets, used by invariant checks and
    /// the sessions view.
    pub fn session_bet_totals(&self, session: &Session) -> (u32, Decimal, Decimal) {
        let mut count = 0u32;
        let mut stake = Decimal::ZERO;
        let mut liability = Decimal::ZERO;
        for &index in &session.bets {
            if let Some(bet) = self.bets_today.get(index) {
                count += 1;
                stake += bet.size;
                liability += bet.liability;
            }
        }
        (count, stake, liability)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub status: EngineStatus,
    pub dry_run: bool,
    pub date: NaiveDate,
    pub session_id: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub countries: Vec<String>,
    pub config: EngineConfig,
    pub balance: Option<Decimal>,
    pub balance_age_seconds: Option<u64>,
    pub last_scan: Option<DateTime<Utc>>,
    pub summary: crate::types::SessionSummary,
    pub next_race: Option<NextRace>,
    pub recent_bets: Vec<BetRecord>,
    pub recent_results: Vec<RuleEvaluation>,
    pub errors: Vec<ErrorEntry>,
    pub trackers_summary: TrackersSummary,
}

/// True when a failed order's dedup keys should be released for a retry
/// on a later tick. Matcher-side transients only; anything else keeps the
/// keys so the engine never re-fires a rejected bet.
pub fn is_recoverable_order_error(code: &str) -> bool {
    matches!(
        code,
        "TIMEOUT" | "EXCHANGE_UNAVAILABLE" | "SERVICE_BUSY" | "ERROR_IN_MATCHER"
    )
}
