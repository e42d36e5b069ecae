//! Durable engine state.
//!
//! Two layers share one JSON document: a hot local file written with
//! atomic replace, and a best-effort object-store blob. The hot file is
//! authoritative unless the blob is newer (the blob survives machines;
//! the file survives restarts).

pub mod blob;

pub use blob::{HttpBlobStore, MemoryBlobStore, ObjectStore};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::rules::RuleEvaluation;
use crate::tracker::MarketTracker;
use crate::types::{ApiKey, BetRecord, ReportEntry, Session, SessionStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Blob object name for the state document.
const STATE_BLOB: &str = "engine_state.json";

/// The persisted schema. Everything the engine needs to survive a
/// restart without double-betting or losing session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub config: crate::config::EngineConfig,
    pub date: NaiveDate,
    pub session: Option<Session>,
    pub sessions_index: Vec<Session>,
    pub bets_today: Vec<BetRecord>,
    pub evaluations_today: Vec<RuleEvaluation>,
    pub trackers: BTreeMap<String, MarketTracker>,
    pub dedup_runners: Vec<(String, DateTime<Utc>)>,
    pub dedup_selections: Vec<(i64, String)>,
    #[serde(default)]
    pub reports_index: Vec<ReportEntry>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    pub saved_at: DateTime<Utc>,
}

impl StateDocument {
    pub fn from_engine(engine: &Engine, saved_at: DateTime<Utc>) -> Self {
        let mut sessions_index: Vec<Session> = engine
            .sessions
            .iter()
            .filter(|s| s.status != SessionStatus::Running)
            .cloned()
            .collect();
        let mut session = engine.current_session().cloned();
        if let Some(s) = session.as_mut() {
            s.last_saved = Some(saved_at);
        }
        for s in sessions_index.iter_mut() {
            s.last_saved = Some(saved_at);
        }

        Self {
            config: engine.config.clone(),
            date: engine.day,
            session,
            sessions_index,
            bets_today: engine.bets_today.clone(),
            evaluations_today: engine.evaluations.iter().cloned().collect(),
            trackers: engine.trackers.clone(),
            dedup_runners: engine.dedup_runners.iter().cloned().collect(),
            dedup_selections: engine.dedup_selections.iter().cloned().collect(),
            reports_index: engine.reports_index.clone(),
            api_keys: engine.api_keys.clone(),
            saved_at,
        }
    }

    /// Rebuild an engine from a loaded document.
    ///
    /// A document from a previous trading day contributes only its session
    /// index (so crashed sessions are still detected); the day-scoped state
    /// starts fresh. A session found RUNNING was interrupted mid-flight and
    /// is marked CRASHED.
    pub fn into_engine(mut self, today: NaiveDate) -> Engine {
        let same_day = self.date == today;
        let mut engine = Engine::new(self.config.clone(), today);

        let mut sessions = std::mem::take(&mut self.sessions_index);
        if let Some(mut current) = self.session.take() {
            if current.status == SessionStatus::Running {
                tracing::info!(
                    session = %current.session_id,
                    "previous session was still running, marking crashed"
                );
                current.status = SessionStatus::Crashed;
                current.stop_time = current.last_saved.or(Some(self.saved_at));
            }
            sessions.push(current);
        }
        sessions.sort_by_key(|s| s.start_time);
        engine.sessions = sessions;
        engine.api_keys = self.api_keys;
        engine.reports_index = self.reports_index;

        if same_day {
            engine.trackers = self.trackers;
            engine.bets_today = self.bets_today;
            engine.evaluations = self.evaluations_today.into();
            engine.dedup_runners = self.dedup_runners.into_iter().collect();
            engine.dedup_selections = self.dedup_selections.into_iter().collect();
            tracing::info!(
                trackers = engine.trackers.len(),
                bets = engine.bets_today.len(),
                "restored same-day engine state"
            );
        } else {
            tracing::info!(
                stored = %self.date,
                %today,
                "state document is from a different day, starting fresh"
            );
        }

        engine
    }
}

pub struct StateStore {
    path: PathBuf,
    blob: Option<std::sync::Arc<dyn ObjectStore>>,
    last_blob_payload: Mutex<Option<String>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, blob: Option<std::sync::Arc<dyn ObjectStore>>) -> Self {
        Self {
            path: path.into(),
            blob,
            last_blob_payload: Mutex::new(None),
        }
    }

    /// Persist the engine: hot file synchronously (atomic replace), blob
    /// best-effort and only when the payload changed.
    pub async fn save(&self, engine: &Engine, now: DateTime<Utc>) -> Result<()> {
        let document = StateDocument::from_engine(engine, now);
        let payload = serde_json::to_string(&document)?;

        self.write_hot(&payload)?;

        if let Some(blob) = &self.blob {
            let mut last = self.last_blob_payload.lock().await;
            if last.as_deref() != Some(payload.as_str()) {
                match blob.put(STATE_BLOB, payload.clone()).await {
                    Ok(()) => *last = Some(payload),
                    Err(e) => tracing::warn!(error = %e, "blob write failed"),
                }
            }
        }
        Ok(())
    }

    fn write_hot(&self, payload: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Persistence(format!("mkdir {parent:?}: {e}")))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .map_err(|e| EngineError::Persistence(format!("create {tmp:?}: {e}")))?;
            file.write_all(payload.as_bytes())
                .map_err(|e| EngineError::Persistence(format!("write {tmp:?}: {e}")))?;
            file.sync_all()
                .map_err(|e| EngineError::Persistence(format!("fsync {tmp:?}: {e}")))?;
        }
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| EngineError::Persistence(format!("rename to {:?}: {e}", self.path)))
    }

    /// Load the freshest state document: hot file first, durable blob when
    /// the hot copy is missing or older. Ok(None) on a true cold start.
    pub async fn load(&self) -> Result<Option<StateDocument>> {
        let hot = self.read_hot()?;

        let durable = match &self.blob {
            Some(blob) => match blob.get(STATE_BLOB).await {
                Ok(Some(raw)) => match serde_json::from_str::<StateDocument>(&raw) {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        tracing::warn!(error = %e, "durable state unparsable, ignoring");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "blob read failed, using hot state only");
                    None
                }
            },
            None => None,
        };

        Ok(match (hot, durable) {
            (Some(hot), Some(durable)) => {
                if durable.saved_at > hot.saved_at {
                    Some(durable)
                } else {
                    Some(hot)
                }
            }
            (Some(hot), None) => Some(hot),
            (None, Some(durable)) => Some(durable),
            (None, None) => None,
        })
    }

    fn read_hot(&self) -> Result<Option<StateDocument>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::Persistence(format!(
                    "read {:?}: {e}",
                    self.path
                )))
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| EngineError::Persistence(format!("parse {:?}: {e}", self.path)))
    }
}
