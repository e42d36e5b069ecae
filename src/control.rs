//! Control surface: the operations an operator UI (or the CLI) invokes.
//!
//! `EngineHandle` is the only sharing point for engine state. Every
//! operation takes the engine mutex, so mutations land between scheduler
//! ticks, and every config change is persisted before the call returns.

use crate::config::{
    sanitize_countries, validate_point_value, validate_window,
};
use crate::engine::{Engine, EngineStatus, StateSnapshot};
use crate::error::EngineError;
use crate::persistence::StateStore;
use crate::pipeline::BetSubmitter;
use crate::scheduler::{MarketFeed, Scheduler, SessionCheck};
use crate::types::{ApiKey, BetRecord, Session, SessionStatus, SessionSummary};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Drain cap when stopping the scheduler.
const STOP_DRAIN: Duration = Duration::from_secs(10);

/// Wire-shaped result of a control operation.
#[derive(Debug, Clone, Serialize)]
pub struct OpResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
}

impl OpResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
            new_value: None,
        }
    }

    pub fn ok_with(value: impl Serialize) -> Self {
        Self {
            status: "ok",
            message: None,
            new_value: serde_json::to_value(value).ok(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: Some(message.into()),
            new_value: None,
        }
    }
}

/// Session list entry (summary only, no bet payloads).
#[derive(Debug, Clone, Serialize)]
pub struct SessionOverview {
    pub session_id: String,
    pub date: chrono::NaiveDate,
    pub mode: crate::types::SessionMode,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub summary: SessionSummary,
}

/// Full session detail with its bets resolved.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub overview: SessionOverview,
    pub bets: Vec<BetRecord>,
}

struct RunState {
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// Holds the single engine instance and its collaborators.
pub struct EngineHandle {
    engine: Arc<Mutex<Engine>>,
    feed: Arc<dyn MarketFeed>,
    submitter: Arc<dyn BetSubmitter>,
    session: Arc<dyn SessionCheck>,
    store: Arc<StateStore>,
    run: Mutex<RunState>,
}

impl EngineHandle {
    pub fn new(
        engine: Arc<Mutex<Engine>>,
        feed: Arc<dyn MarketFeed>,
        submitter: Arc<dyn BetSubmitter>,
        session: Arc<dyn SessionCheck>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            engine,
            feed,
            submitter,
            session,
            store,
            run: Mutex::new(RunState {
                shutdown_tx: None,
                task: None,
            }),
        }
    }

    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        self.engine.clone()
    }

    pub fn feed(&self) -> Arc<dyn MarketFeed> {
        self.feed.clone()
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Launch the scheduler. Idempotent; a second start while running is
    /// an ok no-op.
    pub async fn start(&self) -> OpResponse {
        let mut run = self.run.lock().await;
        if run.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return OpResponse::ok_with("already_running");
        }

        if let Err(e) = self.session.ensure().await {
            tracing::warn!(error = %e, "start refused, exchange login failed");
            return OpResponse::error("not_authenticated");
        }

        let now = Utc::now();
        {
            let mut engine = self.engine.lock().await;
            engine.status = EngineStatus::Starting;
            engine.start_session(now);
            if let Err(e) = self.store.save(&engine, now).await {
                tracing::warn!(error = %e, "failed to persist session start");
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Scheduler::new(
            self.engine.clone(),
            self.feed.clone(),
            self.submitter.clone(),
            self.session.clone(),
            self.store.clone(),
            shutdown_rx,
        );
        run.shutdown_tx = Some(shutdown_tx);
        run.task = Some(tokio::spawn(scheduler.run()));
        tracing::info!("engine started");
        OpResponse::ok()
    }

    /// Signal the scheduler to drain and stop. Idempotent.
    pub async fn stop(&self) -> OpResponse {
        let mut run = self.run.lock().await;
        if let Some(tx) = run.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = run.task.take() {
            if tokio::time::timeout(STOP_DRAIN, task).await.is_err() {
                tracing::warn!("scheduler did not drain inside the cap, detaching");
            }
        }
        // The scheduler normally flushes on exit; make sure status reads
        // STOPPED even if it was never started.
        let mut engine = self.engine.lock().await;
        if engine.status != EngineStatus::AuthFailed {
            engine.status = EngineStatus::Stopped;
        }
        tracing::info!("engine stopped");
        OpResponse::ok()
    }

    // -- Configuration --------------------------------------------------------

    pub async fn toggle_dry_run(&self) -> OpResponse {
        let mut engine = self.engine.lock().await;
        engine.config.dry_run = !engine.config.dry_run;
        let value = engine.config.dry_run;
        self.persist(&mut engine).await;
        OpResponse::ok_with(value)
    }

    pub async fn set_process_window(&self, minutes: u32) -> OpResponse {
        if let Err(e) = validate_window(minutes) {
            return op_error(e);
        }
        let mut engine = self.engine.lock().await;
        engine.config.process_window_minutes = minutes;
        self.persist(&mut engine).await;
        OpResponse::ok_with(minutes)
    }

    pub async fn set_point_value(&self, value: Decimal) -> OpResponse {
        if let Err(e) = validate_point_value(value) {
            return op_error(e);
        }
        let mut engine = self.engine.lock().await;
        engine.config.point_value = value;
        self.persist(&mut engine).await;
        OpResponse::ok_with(value)
    }

    pub async fn set_countries(&self, countries: Vec<String>) -> OpResponse {
        let countries = match sanitize_countries(&countries) {
            Ok(c) => c,
            Err(e) => return op_error(e),
        };
        let mut engine = self.engine.lock().await;
        engine.config.countries = countries.clone();
        // The next universe refresh must use the new set immediately.
        engine.last_universe_refresh = None;
        self.persist(&mut engine).await;
        OpResponse::ok_with(countries)
    }

    pub async fn toggle_spread_control(&self) -> OpResponse {
        let mut engine = self.engine.lock().await;
        engine.config.spread_control_enabled = !engine.config.spread_control_enabled;
        let value = engine.config.spread_control_enabled;
        self.persist(&mut engine).await;
        OpResponse::ok_with(value)
    }

    pub async fn toggle_jofs(&self) -> OpResponse {
        let mut engine = self.engine.lock().await;
        engine.config.jofs_enabled = !engine.config.jofs_enabled;
        let value = engine.config.jofs_enabled;
        self.persist(&mut engine).await;
        OpResponse::ok_with(value)
    }

    pub async fn reset_bets(&self) -> OpResponse {
        let mut engine = self.engine.lock().await;
        engine.reset_bets();
        self.persist(&mut engine).await;
        OpResponse::ok()
    }

    /// Re-read persisted state into the engine. Refused while the
    /// scheduler is running; reloading under a live tick loop would fork
    /// the dedup history.
    pub async fn reload(&self) -> OpResponse {
        {
            let run = self.run.lock().await;
            if run.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
                return OpResponse::error("engine_running");
            }
        }
        let document = match self.store.load().await {
            Ok(Some(document)) => document,
            Ok(None) => return OpResponse::error("no_state"),
            Err(e) => return OpResponse::error(format!("load failed: {e}")),
        };
        let today = crate::scheduler::trading_date(Utc::now());
        let mut engine = self.engine.lock().await;
        *engine = document.into_engine(today);
        OpResponse::ok()
    }

    async fn persist(&self, engine: &mut Engine) {
        let now = Utc::now();
        if let Err(e) = self.store.save(engine, now).await {
            tracing::warn!(error = %e, "failed to persist state");
        } else {
            engine.last_flush = Some(now);
        }
    }

    // -- Views ----------------------------------------------------------------

    pub async fn state(&self) -> StateSnapshot {
        self.engine.lock().await.snapshot()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.ensure().await.is_ok()
    }

    /// Session summaries, most recent first.
    pub async fn sessions(&self) -> Vec<SessionOverview> {
        let engine = self.engine.lock().await;
        engine
            .sessions
            .iter()
            .rev()
            .map(|s| overview(s))
            .collect()
    }

    pub async fn session_detail(&self, session_id: &str) -> Option<SessionDetail> {
        let engine = self.engine.lock().await;
        let session = engine
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)?;
        let bets = session
            .bets
            .iter()
            .filter_map(|&i| engine.bets_today.get(i).cloned())
            .collect();
        Some(SessionDetail {
            overview: overview(session),
            bets,
        })
    }

    // -- API keys --------------------------------------------------------------

    pub async fn generate_api_key(&self, label: &str) -> ApiKey {
        let mut engine = self.engine.lock().await;
        let key = engine.generate_api_key(label, Utc::now());
        self.persist(&mut engine).await;
        key
    }

    pub async fn list_api_keys(&self) -> Vec<serde_json::Value> {
        let engine = self.engine.lock().await;
        engine
            .api_keys
            .iter()
            .map(|k| {
                serde_json::json!({
                    "key_id": k.key_id,
                    "label": k.label,
                    "key_preview": k.preview(),
                    "created_at": k.created_at,
                    "last_used": k.last_used,
                })
            })
            .collect()
    }

    pub async fn revoke_api_key(&self, key_id: &str) -> OpResponse {
        let mut engine = self.engine.lock().await;
        if engine.revoke_api_key(key_id) {
            self.persist(&mut engine).await;
            OpResponse::ok()
        } else {
            OpResponse::error("key_not_found")
        }
    }
}

fn overview(session: &Session) -> SessionOverview {
    SessionOverview {
        session_id: session.session_id.clone(),
        date: session.date,
        mode: session.mode,
        start_time: session.start_time,
        stop_time: session.stop_time,
        status: session.status,
        summary: session.summary.clone(),
    }
}

fn op_error(error: EngineError) -> OpResponse {
    match error {
        EngineError::Control(message) => OpResponse::error(message),
        other => OpResponse::error(other.to_string()),
    }
}

/// Live session check backed by the exchange client.
pub struct ExchangeSessionCheck {
    pub client: crate::client::ExchangeClient,
}

#[async_trait::async_trait]
impl SessionCheck for ExchangeSessionCheck {
    async fn ensure(&self) -> crate::error::Result<()> {
        self.client.session.ensure_session().await.map(|_| ())
    }

    async fn balance(&self) -> Option<(Decimal, u64)> {
        match self.client.account.get_balance().await {
            Ok(balance) => {
                let age = self.client.account.balance_age_secs().await.unwrap_or(0);
                Some((balance, age))
            }
            Err(e) => {
                tracing::debug!(error = %e, "balance fetch failed");
                None
            }
        }
    }
}
