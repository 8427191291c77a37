//! Test doubles for coordinator and sweep tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use super::coordinator::{RefreshCoordinator, RefreshPolicy};
use crate::clock::ManualClock;
use crate::engine::AnalysisEngine;
use crate::error::EngineError;
use crate::models::{EntityMetadata, RatingStats, Review};
use crate::store::MemoryStore;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
}

pub fn review(id: &str, entity_id: &str, rating: u8) -> Review {
    Review {
        id: id.to_string(),
        entity_id: entity_id.to_string(),
        rating,
        content: format!("Review {} for {}", id, entity_id),
        hidden: false,
        created_at: t0() - chrono::Duration::days(1),
    }
}

/// Engine that counts calls, replays queued responses and can hold each
/// call until the test releases it.
pub struct ScriptedEngine {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<String, EngineError>>>,
    gated: bool,
    gates: Mutex<Vec<Arc<Semaphore>>>,
    delay: Option<Duration>,
    started_tx: mpsc::UnboundedSender<usize>,
    started_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<usize>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(VecDeque::new()),
            gated: false,
            gates: Mutex::new(Vec::new()),
            delay: None,
            started_tx,
            started_rx: tokio::sync::Mutex::new(started_rx),
        }
    }

    /// Every call blocks until [`ScriptedEngine::release_call`] is called
    /// with its index.
    pub fn gated() -> Self {
        Self {
            gated: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, response: Result<String, EngineError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn gate(&self, index: usize) -> Arc<Semaphore> {
        let mut gates = self.gates.lock().unwrap();
        while gates.len() <= index {
            gates.push(Arc::new(Semaphore::new(0)));
        }
        Arc::clone(&gates[index])
    }

    /// Lets the call with the given zero-based index return.
    pub fn release_call(&self, index: usize) {
        self.gate(index).add_permits(1);
    }

    /// Waits until the next engine call has started.
    pub async fn wait_started(&self) -> usize {
        self.started_rx.lock().await.recv().await.unwrap()
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn analyze(
        &self,
        entity: &EntityMetadata,
        _reviews: &[Review],
        stats: &RatingStats,
        _timeout: Duration,
    ) -> Result<String, EngineError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started_tx.send(index);

        if self.gated {
            let gate = self.gate(index);
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(format!(
                "Analysis #{} of {} ({})",
                index + 1,
                entity.name,
                stats
            ))
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<ScriptedEngine>,
    pub clock: Arc<ManualClock>,
    pub coordinator: RefreshCoordinator,
}

pub async fn fixture(engine: ScriptedEngine) -> Fixture {
    fixture_with(engine, RefreshPolicy::default()).await
}

pub async fn fixture_with(engine: ScriptedEngine, policy: RefreshPolicy) -> Fixture {
    let store = Arc::new(MemoryStore::in_memory());
    let engine = Arc::new(engine);
    let clock = Arc::new(ManualClock::new(t0()));
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        store.clone(),
        engine.clone(),
        clock.clone(),
        policy,
    );

    Fixture {
        store,
        engine,
        clock,
        coordinator,
    }
}
