//! External collaborators the engine delegates to, and in-process versions
//! of each for development and tests.
//!
//! Production: back `EngagementStore` with the tracking warehouse,
//! `ActionService` with the channel delivery layer and `ParticipantDirectory`
//! with the CRM contact table.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use nurture_core::types::{EngagementEvent, EngagementEventType};
use nurture_core::{NurtureError, NurtureResult};

use crate::types::StepAction;

/// Read-only engagement history.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    async fn count_events(
        &self,
        participant_id: &str,
        event_type: EngagementEventType,
        since: DateTime<Utc>,
    ) -> NurtureResult<u64>;
}

/// Performs one step action for one participant and returns an artifact id
/// (message id, tag assignment id, ...).
#[async_trait]
pub trait ActionService: Send + Sync {
    async fn execute(&self, action: &StepAction, participant_id: &str) -> NurtureResult<String>;
}

/// Answers whether a participant exists within a tenant.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn exists(&self, tenant_id: Uuid, participant_id: &str) -> NurtureResult<bool>;
}

// ─── Engagement ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryEngagementStore {
    events: DashMap<String, Vec<EngagementEvent>>,
    offline: AtomicBool,
}

impl InMemoryEngagementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, event: EngagementEvent) {
        self.events
            .entry(event.participant_id.clone())
            .or_default()
            .push(event);
    }

    /// Shorthand for recording an event of `event_type` at `occurred_at`.
    pub fn record(
        &self,
        participant_id: &str,
        event_type: EngagementEventType,
        occurred_at: DateTime<Utc>,
    ) {
        self.record_event(EngagementEvent {
            participant_id: participant_id.to_string(),
            event_type,
            occurred_at,
        });
    }

    /// Simulates the history service being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngagementStore for InMemoryEngagementStore {
    async fn count_events(
        &self,
        participant_id: &str,
        event_type: EngagementEventType,
        since: DateTime<Utc>,
    ) -> NurtureResult<u64> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NurtureError::Store(
                "engagement history unreachable".to_string(),
            ));
        }
        Ok(self
            .events
            .get(participant_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.event_type == event_type && e.occurred_at >= since)
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

// ─── Actions ────────────────────────────────────────────────────────────

/// An action call observed by `InMemoryActionService`.
#[derive(Debug, Clone)]
pub struct ExecutedAction {
    pub artifact_id: String,
    pub participant_id: String,
    pub action: StepAction,
    pub executed_at: DateTime<Utc>,
}

/// Logs every action and returns a synthetic artifact id. Failures and
/// latency can be injected per participant for tests.
#[derive(Default)]
pub struct InMemoryActionService {
    executed: Mutex<Vec<ExecutedAction>>,
    failures: DashMap<String, String>,
    latency_ms: AtomicU64,
}

impl InMemoryActionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action for `participant_id` fails with `message` from now on.
    pub fn fail_for(&self, participant_id: &str, message: &str) {
        self.failures
            .insert(participant_id.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Delay applied before each action completes.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<ExecutedAction> {
        self.executed.lock().clone()
    }

    pub fn executed_for(&self, participant_id: &str) -> Vec<ExecutedAction> {
        self.executed
            .lock()
            .iter()
            .filter(|a| a.participant_id == participant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ActionService for InMemoryActionService {
    async fn execute(&self, action: &StepAction, participant_id: &str) -> NurtureResult<String> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if let Some(message) = self.failures.get(participant_id) {
            return Err(NurtureError::ActionExecution(message.value().clone()));
        }

        let artifact_id = format!("{}-{}", action.kind(), Uuid::new_v4());
        info!(
            participant_id = %participant_id,
            action = action.kind(),
            artifact_id = %artifact_id,
            "Action delivered (in-process)"
        );
        self.executed.lock().push(ExecutedAction {
            artifact_id: artifact_id.clone(),
            participant_id: participant_id.to_string(),
            action: action.clone(),
            executed_at: Utc::now(),
        });
        Ok(artifact_id)
    }
}

// ─── Participants ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryParticipantDirectory {
    participants: DashMap<Uuid, HashSet<String>>,
}

impl InMemoryParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: Uuid, participant_id: &str) {
        self.participants
            .entry(tenant_id)
            .or_default()
            .insert(participant_id.to_string());
    }
}

#[async_trait]
impl ParticipantDirectory for InMemoryParticipantDirectory {
    async fn exists(&self, tenant_id: Uuid, participant_id: &str) -> NurtureResult<bool> {
        Ok(self
            .participants
            .get(&tenant_id)
            .map(|set| set.contains(participant_id))
            .unwrap_or(false))
    }
}
