//! The tick loop driving market discovery, monitoring, and betting.
//!
//! One scheduler task owns the cadence; all engine-state writes happen
//! while it holds the engine mutex, so control operations slot in between
//! ticks. Book fetches fan out on a bounded pool; evaluation and bet
//! submission stay strictly serial in (race_time, market_id) order.

use crate::client::BettingClient;
use crate::engine::{Engine, EngineStatus};
use crate::error::Result;
use crate::persistence::StateStore;
use crate::pipeline::{self, BetSubmitter};
use crate::rules::{self, RuleEvaluation};
use crate::tracker::{MarketTracker, TrackerState};
use crate::types::{Market, MarketBook, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};

/// Universe refresh happens at most this often.
const UNIVERSE_REFRESH_SECS: i64 = 300;
/// Opportunistic persistence cadence.
const FLUSH_INTERVAL_SECS: i64 = 150;
/// Bounded fan-out for book fetches within one tick.
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Read seam over the exchange so ticks can run against fixtures.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn list_win_markets(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        countries: &[String],
    ) -> Result<Vec<Market>>;

    async fn get_book(&self, market_id: &str) -> Result<MarketBook>;

    /// Depth view for the operator UI. Feeds without depth return an error.
    async fn get_book_full(&self, market_id: &str) -> Result<crate::types::MarketBookFull> {
        Err(crate::error::EngineError::Malformed(format!(
            "no depth available for {market_id}"
        )))
    }
}

#[async_trait]
impl MarketFeed for BettingClient {
    async fn list_win_markets(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        countries: &[String],
    ) -> Result<Vec<Market>> {
        BettingClient::list_win_markets(self, from, to, countries).await
    }

    async fn get_book(&self, market_id: &str) -> Result<MarketBook> {
        BettingClient::get_book(self, market_id).await
    }

    async fn get_book_full(&self, market_id: &str) -> Result<crate::types::MarketBookFull> {
        BettingClient::get_book_full(self, market_id, 3).await
    }
}

/// Hook the scheduler uses to confirm the exchange session before a tick.
#[async_trait]
pub trait SessionCheck: Send + Sync {
    /// Ok(()) when authenticated; an auth error stops the scheduler.
    async fn ensure(&self) -> Result<()>;

    /// Best-effort balance for the UI; None when unavailable.
    async fn balance(&self) -> Option<(Decimal, u64)>;
}

/// Market-id cohorts for one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cohorts {
    /// Inside the processing window, ascending (race_time, market_id).
    pub in_window: Vec<String>,
    /// Due for a monitoring snapshot.
    pub monitoring: Vec<String>,
    /// Past the off.
    pub expiry: Vec<String>,
}

/// Partition trackers by minutes-to-off. Pure; the scheduler and tests
/// share it.
pub fn partition_cohorts(
    trackers: &BTreeMap<String, MarketTracker>,
    window_minutes: u32,
    now: DateTime<Utc>,
) -> Cohorts {
    let window = Decimal::from(window_minutes);
    let mut cohorts = Cohorts::default();
    let mut in_window: Vec<(DateTime<Utc>, String)> = Vec::new();

    for (market_id, tracker) in trackers {
        let minutes = tracker.market.minutes_to_off(now);
        if minutes <= Decimal::ZERO {
            if tracker.state != TrackerState::Expired {
                cohorts.expiry.push(market_id.clone());
            }
        } else if minutes <= window {
            if !tracker.is_terminal() {
                in_window.push((tracker.market.race_time, market_id.clone()));
            }
        } else if matches!(
            tracker.state,
            TrackerState::Discovered | TrackerState::Monitoring
        ) && tracker.snapshot_due(now)
        {
            cohorts.monitoring.push(market_id.clone());
        }
    }

    in_window.sort();
    cohorts.in_window = in_window.into_iter().map(|(_, id)| id).collect();
    cohorts
}

/// Insert newly discovered markets. Existing trackers keep their state;
/// terminal ones are never overwritten.
pub fn merge_universe(trackers: &mut BTreeMap<String, MarketTracker>, markets: Vec<Market>) {
    for market in markets {
        trackers
            .entry(market.market_id.clone())
            .or_insert_with(|| MarketTracker::new(market));
    }
}

/// The local trading date for a given instant.
pub fn trading_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}

/// From `now` to the end of the local trading day, in UTC.
pub fn trading_day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(&Local);
    let end_local = local
        .date_naive()
        .and_hms_opt(23, 59, 59)
        .expect("valid end-of-day time");
    let end = end_local
        .and_local_timezone(Local)
        .latest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + chrono::Duration::hours(24));
    (now, end)
}

pub struct Scheduler {
    engine: Arc<Mutex<Engine>>,
    feed: Arc<dyn MarketFeed>,
    submitter: Arc<dyn BetSubmitter>,
    session: Arc<dyn SessionCheck>,
    store: Arc<StateStore>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<Mutex<Engine>>,
        feed: Arc<dyn MarketFeed>,
        submitter: Arc<dyn BetSubmitter>,
        session: Arc<dyn SessionCheck>,
        store: Arc<StateStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            feed,
            submitter,
            session,
            store,
            shutdown,
        }
    }

    /// Drive ticks until stop is signalled or authentication fails.
    pub async fn run(mut self) {
        {
            let mut engine = self.engine.lock().await;
            engine.status = EngineStatus::Running;
            tracing::info!(
                dry_run = engine.config.dry_run,
                poll = engine.config.poll_interval_secs,
                "scheduler running"
            );
        }

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let started = std::time::Instant::now();
            let keep_going = self.tick(Utc::now()).await;
            if !keep_going {
                return;
            }

            let poll = {
                let engine = self.engine.lock().await;
                engine.config.poll_interval_secs
            };
            // Soft budget: half the poll interval. Overruns are reported
            // but in-flight work is never aborted.
            let elapsed = started.elapsed();
            if elapsed.as_secs() > poll / 2 {
                tracing::warn!(elapsed_secs = elapsed.as_secs(), poll, "tick over soft budget");
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(poll)) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        self.finish(SessionStatus::Stopped).await;
    }

    async fn finish(&self, status: SessionStatus) {
        let mut engine = self.engine.lock().await;
        let now = Utc::now();
        engine.close_session(now, status);
        if engine.status != EngineStatus::AuthFailed {
            engine.status = EngineStatus::Stopped;
        }
        if let Err(e) = self.store.save(&engine, now).await {
            tracing::warn!(error = %e, "final flush failed");
        }
        engine.last_flush = Some(now);
        tracing::info!("scheduler stopped");
    }

    /// One pass over the tracker map. Returns false when the scheduler
    /// must stop (authentication failed twice).
    pub async fn tick(&self, now: DateTime<Utc>) -> bool {
        if let Err(e) = self.session.ensure().await {
            if e.is_auth() {
                let mut engine = self.engine.lock().await;
                engine.status = EngineStatus::AuthFailed;
                engine.record_error(now, format!("authentication failed: {e}"));
                drop(engine);
                self.finish(SessionStatus::Crashed).await;
                return false;
            }
            // Transient: skip this tick, keep the loop alive.
            let mut engine = self.engine.lock().await;
            engine.record_error(now, format!("session check failed: {e}"));
            return true;
        }

        let mut engine = self.engine.lock().await;
        engine.last_scan = Some(now);
        let rolled = engine.check_rollover(trading_date(now), now);

        let mut significant = rolled;

        // Universe refresh at most every five minutes.
        let refresh_due = engine
            .last_universe_refresh
            .map(|at| (now - at).num_seconds() >= UNIVERSE_REFRESH_SECS)
            .unwrap_or(true);
        if refresh_due {
            let (from, to) = trading_day_bounds(now);
            let countries = engine.config.countries.clone();
            match self.feed.list_win_markets(from, to, &countries).await {
                Ok(markets) => {
                    merge_universe(&mut engine.trackers, markets);
                    engine.last_universe_refresh = Some(now);
                }
                Err(e) => {
                    engine.record_error(now, format!("market discovery failed: {e}"));
                }
            }
        }

        let cohorts =
            partition_cohorts(&engine.trackers, engine.config.process_window_minutes, now);
        tracing::debug!(
            in_window = cohorts.in_window.len(),
            monitoring = cohorts.monitoring.len(),
            expiry = cohorts.expiry.len(),
            "tick cohorts"
        );

        // Fan out book fetches for everything this tick needs.
        let mut fetch_ids = cohorts.in_window.clone();
        fetch_ids.extend(cohorts.monitoring.iter().cloned());
        let books = self.fetch_books(&fetch_ids).await;

        // IN_WINDOW: evaluate and submit serially, nearest race first.
        for market_id in &cohorts.in_window {
            if *self.shutdown.borrow() {
                // Draining: no further bets once stop is signalled.
                break;
            }
            match books.get(market_id) {
                Some(Ok(book)) => {
                    if self.process_market(&mut engine, market_id, book, now).await {
                        significant = true;
                    }
                }
                Some(Err(e)) => {
                    // Retried next tick; the tracker stays where it is.
                    engine.record_error(now, format!("book fetch {market_id} failed: {e}"));
                }
                None => {}
            }
        }

        // MONITORING: refresh prices and snapshot.
        for market_id in &cohorts.monitoring {
            if let Some(Ok(book)) = books.get(market_id) {
                monitor_market(&mut engine, market_id, book, now);
            }
        }

        // EXPIRY: the off has passed, nothing further today.
        for market_id in &cohorts.expiry {
            if let Some(tracker) = engine.trackers.get_mut(market_id) {
                tracker.mark_expired("race started");
            }
        }

        engine.update_next_race(now);

        if let Some((balance, age)) = self.session.balance().await {
            engine.balance = Some(balance);
            engine.balance_age_secs = Some(age);
        }

        let flush_due = engine
            .last_flush
            .map(|at| (now - at).num_seconds() >= FLUSH_INTERVAL_SECS)
            .unwrap_or(true);
        if significant || flush_due {
            if let Err(e) = self.store.save(&engine, now).await {
                tracing::warn!(error = %e, "state flush failed");
            }
            engine.last_flush = Some(now);
        }

        true
    }

    async fn fetch_books(
        &self,
        market_ids: &[String],
    ) -> HashMap<String, Result<MarketBook>> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut handles = Vec::with_capacity(market_ids.len());
        for market_id in market_ids {
            let semaphore = semaphore.clone();
            let feed = self.feed.clone();
            let market_id = market_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let book = feed.get_book(&market_id).await;
                (market_id, book)
            }));
        }

        let mut books = HashMap::with_capacity(handles.len());
        for handle in handles {
            if let Ok((market_id, book)) = handle.await {
                books.insert(market_id, book);
            }
        }
        books
    }

    /// Evaluate one in-window market and push any instructions through the
    /// pipeline. Returns true when state changed in a way worth flushing.
    async fn process_market(
        &self,
        engine: &mut Engine,
        market_id: &str,
        book: &MarketBook,
        now: DateTime<Utc>,
    ) -> bool {
        let market = {
            let tracker = match engine.trackers.get_mut(market_id) {
                Some(t) => t,
                None => return false,
            };
            tracker.market.apply_book(book);
            tracker.enter_window();
            tracker.market.clone()
        };

        tracing::info!(
            venue = %market.venue,
            name = %market.market_name,
            minutes_to_off = %market.minutes_to_off(now),
            "processing market"
        );

        let decision = rules::apply_rules(&market, &engine.config);
        let skip_reason = decision.skip_reason.clone();
        let skipped = decision.skipped;

        if !skipped {
            pipeline::submit_instructions(engine, self.submitter.as_ref(), &market, &decision, now)
                .await;
        }

        engine.record_evaluation(RuleEvaluation {
            evaluated_at: now,
            decision,
        });

        if let Some(tracker) = engine.trackers.get_mut(market_id) {
            match skip_reason.as_deref() {
                Some("in_play_or_closed") | Some("max_odds_exceeded") => {
                    tracker.mark_skipped(skip_reason.clone().unwrap_or_default());
                }
                _ => {
                    tracker.mark_processed();
                    engine.record_market_processed();
                }
            }
        }
        true
    }
}

/// Apply a monitoring-cohort book and record a snapshot if still due.
fn monitor_market(engine: &mut Engine, market_id: &str, book: &MarketBook, now: DateTime<Utc>) {
    let max_lay_odds = engine.config.max_lay_odds;
    if let Some(tracker) = engine.trackers.get_mut(market_id) {
        tracker.market.apply_book(book);

        if tracker.market.in_play {
            tracker.mark_skipped("in_play");
            return;
        }
        // An absurd favourite price on the very first look means an
        // illiquid market not worth following.
        let first_look = tracker.snapshots.is_empty();
        if first_look {
            if let Some(odds) = tracker
                .market
                .favourite()
                .and_then(|r| r.best_available_to_lay)
            {
                if odds > max_lay_odds {
                    tracker.mark_skipped("max_odds_exceeded");
                    return;
                }
            }
        }

        if tracker.snapshot_due(now) {
            tracker.record_snapshot(now);
        }
    }
}
