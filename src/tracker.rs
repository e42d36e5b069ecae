//! Per-market lifecycle tracking.
//!
//! Each discovered market gets a tracker that walks
//! DISCOVERED → MONITORING → IN_WINDOW → PROCESSED → EXPIRED, with a
//! SKIPPED side-exit for markets that go in-play early or open at
//! untradeable odds. PROCESSED is terminal for the trading day, which is
//! what stops a re-scan from betting the same race twice.

use crate::types::{Market, OddsSnapshot, SnapshotRunner};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cap on stored snapshots per market; oldest dropped on overflow.
pub const MAX_SNAPSHOTS: usize = 20;

/// Monitoring cadence: a snapshot is due after this many minutes of wall
/// clock, or after the same amount of drift in minutes-to-off.
const SNAPSHOT_INTERVAL_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerState {
    Discovered,
    Monitoring,
    InWindow,
    Processed,
    Expired,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTracker {
    pub market: Market,
    pub state: TrackerState,
    pub snapshots: VecDeque<OddsSnapshot>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// Populated when the tracker lands in SKIPPED or EXPIRED.
    pub reason: Option<String>,
}

impl MarketTracker {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            state: TrackerState::Discovered,
            snapshots: VecDeque::new(),
            last_snapshot_at: None,
            reason: None,
        }
    }

    /// No further bets may ever be attempted against this tracker today.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TrackerState::Processed | TrackerState::Expired | TrackerState::Skipped
        )
    }

    /// Whether the monitoring cadence calls for a fresh snapshot.
    pub fn snapshot_due(&self, now: DateTime<Utc>) -> bool {
        if !matches!(self.state, TrackerState::Discovered | TrackerState::Monitoring) {
            return false;
        }
        let last_at = match self.last_snapshot_at {
            None => return true,
            Some(at) => at,
        };
        if (now - last_at).num_minutes() >= SNAPSHOT_INTERVAL_MINUTES {
            return true;
        }
        // A delayed race can sit still in wall clock while its off drifts:
        // drift of >= 5 minutes-to-off also triggers a capture.
        if let Some(prev) = self.snapshots.back() {
            let current = self.market.minutes_to_off(now);
            if prev.minutes_to_off - current >= Decimal::from(SNAPSHOT_INTERVAL_MINUTES) {
                return true;
            }
        }
        false
    }

    /// Capture the market's current prices. Promotes DISCOVERED to
    /// MONITORING on the first capture.
    pub fn record_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = OddsSnapshot {
            captured_at: now,
            minutes_to_off: self.market.minutes_to_off(now).max(dec!(0)),
            runners: self
                .market
                .runners
                .iter()
                .map(|r| SnapshotRunner {
                    selection_id: r.selection_id,
                    name: r.name.clone(),
                    sort_priority: r.sort_priority,
                    best_available_to_lay: r.best_available_to_lay,
                    best_available_to_back: r.best_available_to_back,
                })
                .collect(),
        };
        if self.snapshots.len() >= MAX_SNAPSHOTS {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        self.last_snapshot_at = Some(now);
        if self.state == TrackerState::Discovered {
            self.state = TrackerState::Monitoring;
        }
    }

    pub fn enter_window(&mut self) {
        if !self.is_terminal() {
            self.state = TrackerState::InWindow;
        }
    }

    pub fn mark_processed(&mut self) {
        self.state = TrackerState::Processed;
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            self.state = TrackerState::Skipped;
            self.reason = Some(reason.into());
        }
    }

    pub fn mark_expired(&mut self, reason: impl Into<String>) {
        if self.state != TrackerState::Expired {
            self.state = TrackerState::Expired;
            self.reason = Some(reason.into());
        }
    }
}
