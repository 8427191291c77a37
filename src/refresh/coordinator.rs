//! Refresh coordinator.
//!
//! Decides per request whether to serve the cached analysis, report or wait
//! on an in-flight refresh, or run the engine, and persists new analyses with
//! compare-and-set keyed on `computedAt`.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::lease::{Acquire, Busy, LeaseTable, SharedOutcome};
use crate::analysis::{ReviewSnapshot, StatsAggregator};
use crate::clock::Clock;
use crate::engine::AnalysisEngine;
use crate::error::{EngineError, RefreshError};
use crate::models::{AiAnalysis, Entity, EntityId, RatingStats, RefreshOutcome};
use crate::store::{EntityStore, ReviewStore};

/// Timing and retry knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// A cached analysis younger than this is served as is.
    pub freshness_window: Duration,
    /// Age after which an in-flight lease counts as abandoned.
    pub lease_ttl: Duration,
    /// Upper bound on one engine call.
    pub engine_timeout: std::time::Duration,
    /// Compare-and-set attempts before giving up on a write.
    pub max_cas_attempts: usize,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            freshness_window: Duration::hours(1),
            lease_ttl: Duration::seconds(120),
            engine_timeout: std::time::Duration::from_secs(90),
            max_cas_attempts: 3,
        }
    }
}

/// One caller's refresh request. Lives for a single coordination cycle.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub entity_id: EntityId,
    /// Recompute even if the cached analysis is fresh.
    pub force: bool,
    /// Wait for an in-flight refresh instead of returning `InProgress`.
    pub wait: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Why a cached analysis is or is not served.
#[derive(Debug, Clone, PartialEq)]
pub enum Staleness {
    Fresh,
    NeverAnalyzed,
    Expired { age: Duration },
    ReviewCountChanged { stored: u64, current: u64 },
}

impl Staleness {
    /// Classify an entity's cached analysis at `now`.
    pub fn assess(
        entity: &Entity,
        current_count: u64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let Some(analysis) = &entity.ai_analysis else {
            return Staleness::NeverAnalyzed;
        };

        let age = now - analysis.computed_at;
        if age >= window {
            return Staleness::Expired { age };
        }

        if entity.rating_stats.count != current_count {
            return Staleness::ReviewCountChanged {
                stored: entity.rating_stats.count,
                current: current_count,
            };
        }

        Staleness::Fresh
    }

    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

/// Orchestrates analysis refreshes across concurrent callers.
pub struct RefreshCoordinator {
    entities: Arc<dyn EntityStore>,
    aggregator: StatsAggregator,
    engine: Arc<dyn AnalysisEngine>,
    leases: Arc<LeaseTable>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
}

impl RefreshCoordinator {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        reviews: Arc<dyn ReviewStore>,
        engine: Arc<dyn AnalysisEngine>,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            entities,
            aggregator: StatsAggregator::new(reviews),
            engine,
            leases: LeaseTable::new(policy.lease_ttl, clock.clone()),
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }

    /// Entity ids known to the entity store.
    pub async fn entity_ids(&self) -> Result<Vec<EntityId>, RefreshError> {
        self.entities
            .list_ids()
            .await
            .map_err(|e| RefreshError::from_store("*", e))
    }

    /// Refresh one entity's analysis.
    pub async fn refresh(
        &self,
        entity_id: &str,
        force: bool,
        wait: bool,
    ) -> Result<RefreshOutcome, RefreshError> {
        self.handle(RefreshRequest {
            entity_id: entity_id.to_string(),
            force,
            wait,
            submitted_at: self.clock.now(),
        })
        .await
    }

    /// Run one coordination cycle for `request`.
    pub async fn handle(&self, request: RefreshRequest) -> Result<RefreshOutcome, RefreshError> {
        let entity_id = request.entity_id.as_str();
        debug!(entity_id, force = request.force, wait = request.wait, "Refresh requested");

        let entity = self
            .entities
            .get(entity_id)
            .await
            .map_err(|e| RefreshError::from_store(entity_id, e))?;

        if let Some(busy) = self.leases.current(entity_id) {
            return self.on_busy(entity_id, busy, request.wait).await;
        }

        if !request.force {
            let stats = self
                .aggregator
                .compute_stats(entity_id)
                .await
                .map_err(|e| RefreshError::from_store(entity_id, e))?;

            let staleness = Staleness::assess(
                &entity,
                stats.count,
                request.submitted_at,
                self.policy.freshness_window,
            );
            match (&staleness, &entity.ai_analysis) {
                (Staleness::Fresh, Some(cached)) => {
                    debug!(entity_id, version = cached.version, "Serving cached analysis");
                    return Ok(RefreshOutcome::Cached(cached.clone()));
                }
                _ => debug!(entity_id, ?staleness, "Cached analysis is stale"),
            }
        }

        let guard = match self.leases.try_acquire(entity_id) {
            Acquire::Acquired(guard) => guard,
            Acquire::Busy(busy) => return self.on_busy(entity_id, busy, request.wait).await,
        };

        info!(
            entity_id,
            force = request.force,
            generation = guard.generation(),
            "Refreshing analysis"
        );
        let outcome = self.run(entity_id, guard.started_at()).await;
        match &outcome {
            Ok(o) => info!(entity_id, outcome = o.kind(), "Refresh finished"),
            Err(e) => warn!(entity_id, error = %e, "Refresh failed"),
        }

        guard.complete(outcome.clone());
        outcome
    }

    /// Another caller holds the lease: report it, or wait for its outcome.
    async fn on_busy(&self, entity_id: &str, mut busy: Busy, wait: bool) -> SharedOutcome {
        if !wait {
            debug!(entity_id, started_at = %busy.started_at, "Refresh already in progress");
            return Ok(RefreshOutcome::InProgress {
                started_at: busy.started_at,
            });
        }

        // Never wait past the point where the lease expires.
        let max_wait = self.leases.remaining(busy.started_at);

        debug!(entity_id, "Waiting on in-flight refresh");
        match tokio::time::timeout(max_wait, busy.receiver.recv()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(RecvError::Closed)) | Ok(Err(RecvError::Lagged(_))) => {
                Err(RefreshError::AnalysisFailed {
                    entity_id: entity_id.to_string(),
                    cause: "in-flight refresh ended without a result".to_string(),
                })
            }
            Err(_) => Ok(RefreshOutcome::InProgress {
                started_at: busy.started_at,
            }),
        }
    }

    /// Recompute and persist under a held lease.
    async fn run(&self, entity_id: &str, started_at: DateTime<Utc>) -> SharedOutcome {
        // Re-read under the lease: the expectation for the CAS must be the
        // latest persisted state, not what the request saw.
        let entity = self
            .entities
            .get(entity_id)
            .await
            .map_err(|e| RefreshError::from_store(entity_id, e))?;

        let snapshot = self
            .aggregator
            .snapshot(entity_id)
            .await
            .map_err(|e| RefreshError::from_store(entity_id, e))?;

        let text = self.call_engine(&entity, &snapshot).await?;

        self.persist(entity, snapshot.stats, text, started_at).await
    }

    async fn call_engine(
        &self,
        entity: &Entity,
        snapshot: &ReviewSnapshot,
    ) -> Result<String, RefreshError> {
        let metadata = entity.metadata();
        let timeout = self.policy.engine_timeout;

        let call = self
            .engine
            .analyze(&metadata, &snapshot.reviews, &snapshot.stats, timeout);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(RefreshError::from_engine(&entity.id, e)),
            Err(_) => Err(RefreshError::from_engine(
                &entity.id,
                EngineError::Timeout(timeout),
            )),
        }
    }

    /// Write the new analysis, retrying the CAS while the stored analysis is
    /// older than ours. `computed_at` is the time the lease was taken, i.e.
    /// the moment the summarized data was read.
    async fn persist(
        &self,
        mut entity: Entity,
        stats: RatingStats,
        text: String,
        computed_at: DateTime<Utc>,
    ) -> SharedOutcome {
        let entity_id = entity.id.clone();
        let mut attempt = 0;

        loop {
            if let Some(current) = entity
                .ai_analysis
                .as_ref()
                .filter(|stored| stored.computed_at >= computed_at)
            {
                info!(
                    entity_id = %entity_id,
                    stored = %current.computed_at,
                    ours = %computed_at,
                    "Newer analysis already stored, discarding ours"
                );
                return Ok(RefreshOutcome::Superseded(current.clone()));
            }

            if attempt >= self.policy.max_cas_attempts {
                return Err(RefreshError::StoreUnavailable {
                    entity_id,
                    cause: format!(
                        "compare-and-set did not succeed after {} attempts",
                        attempt
                    ),
                });
            }
            attempt += 1;

            let analysis = AiAnalysis {
                text: text.clone(),
                computed_at,
                version: entity.analysis_version() + 1,
            };

            let written = self
                .entities
                .compare_and_set_analysis(&entity_id, entity.computed_at(), stats, analysis.clone())
                .await
                .map_err(|e| RefreshError::from_store(&entity_id, e))?;

            if written {
                return Ok(RefreshOutcome::Refreshed { analysis, stats });
            }

            debug!(entity_id = %entity_id, attempt, "Compare-and-set lost, re-reading entity");
            entity = self
                .entities
                .get(&entity_id)
                .await
                .map_err(|e| RefreshError::from_store(&entity_id, e))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::testing::{fixture, fixture_with, review, t0, ScriptedEngine};

    #[test]
    fn test_staleness_rules() {
        let window = Duration::hours(1);
        let mut entity = Entity::new("e1", "Ada");
        assert_eq!(
            Staleness::assess(&entity, 0, t0(), window),
            Staleness::NeverAnalyzed
        );

        entity.rating_stats = RatingStats {
            count: 2,
            average: Some(4.5),
        };
        entity.ai_analysis = Some(AiAnalysis {
            text: "x".to_string(),
            computed_at: t0(),
            version: 1,
        });

        let fresh = Staleness::assess(&entity, 2, t0() + Duration::minutes(59), window);
        assert_eq!(fresh, Staleness::Fresh);
        assert!(!fresh.is_stale());

        assert!(matches!(
            Staleness::assess(&entity, 2, t0() + Duration::hours(1), window),
            Staleness::Expired { .. }
        ));
        assert_eq!(
            Staleness::assess(&entity, 3, t0() + Duration::minutes(1), window),
            Staleness::ReviewCountChanged {
                stored: 2,
                current: 3
            }
        );
    }

    #[tokio::test]
    async fn test_first_refresh_computes_stats_and_analysis() {
        let fx = fixture(ScriptedEngine::new()).await;
        fx.store.upsert_entity(Entity::new("E1", "Ada")).await;
        for (i, rating) in [4, 5, 3].into_iter().enumerate() {
            fx.store.insert_review(review(&format!("r{}", i), "E1", rating)).await;
        }

        let outcome = fx.coordinator.refresh("E1", false, false).await.unwrap();

        let RefreshOutcome::Refreshed { analysis, stats } = outcome else {
            panic!("expected a fresh analysis, got {:?}", outcome);
        };
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average, Some(4.0));
        assert_eq!(analysis.computed_at, t0());
        assert_eq!(analysis.version, 1);
        assert_eq!(fx.engine.calls(), 1);

        let stored = fx.store.get("E1").await.unwrap();
        assert_eq!(stored.rating_stats, stats);
        assert_eq!(stored.ai_analysis, Some(analysis));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_engine() {
        let fx = fixture(ScriptedEngine::new()).await;
        let mut entity = Entity::new("E2", "Ben");
        entity.rating_stats = RatingStats {
            count: 1,
            average: Some(5.0),
        };
        entity.ai_analysis = Some(AiAnalysis {
            text: "cached".to_string(),
            computed_at: t0() - Duration::minutes(1),
            version: 4,
        });
        fx.store.upsert_entity(entity.clone()).await;
        fx.store.insert_review(review("r1", "E2", 5)).await;

        let outcome = fx.coordinator.refresh("E2", false, false).await.unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome::Cached(entity.ai_analysis.clone().unwrap())
        );
        assert_eq!(fx.engine.calls(), 0);
        assert_eq!(fx.store.get("E2").await.unwrap(), entity);
    }

    #[tokio::test]
    async fn test_second_unforced_refresh_is_cached() {
        let fx = fixture(ScriptedEngine::new()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        fx.store.insert_review(review("r1", "e1", 4)).await;

        let first = fx.coordinator.refresh("e1", false, false).await.unwrap();
        fx.clock.advance(Duration::minutes(10));
        let second = fx.coordinator.refresh("e1", false, false).await.unwrap();

        assert_eq!(first.kind(), "refreshed");
        assert_eq!(second.kind(), "cached");
        assert_eq!(first.analysis(), second.analysis());
        assert_eq!(fx.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_new_review_invalidates_cache() {
        let fx = fixture(ScriptedEngine::new()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        fx.store.insert_review(review("r1", "e1", 4)).await;
        fx.coordinator.refresh("e1", false, false).await.unwrap();

        fx.clock.advance(Duration::minutes(1));
        fx.store.insert_review(review("r2", "e1", 2)).await;
        let outcome = fx.coordinator.refresh("e1", false, false).await.unwrap();

        let RefreshOutcome::Refreshed { analysis, stats } = outcome else {
            panic!("expected recompute after a new review");
        };
        assert_eq!(stats.count, 2);
        assert_eq!(stats.average, Some(3.0));
        assert_eq!(analysis.version, 2);
        assert_eq!(fx.engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_cache_is_recomputed() {
        let fx = fixture(ScriptedEngine::new()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        fx.coordinator.refresh("e1", false, false).await.unwrap();

        fx.clock.advance(Duration::hours(2));
        let outcome = fx.coordinator.refresh("e1", false, false).await.unwrap();

        assert_eq!(outcome.kind(), "refreshed");
        assert_eq!(outcome.analysis().unwrap().computed_at, t0() + Duration::hours(2));
        assert_eq!(fx.engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_bypasses_fresh_cache() {
        let fx = fixture(ScriptedEngine::new()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        fx.coordinator.refresh("e1", false, false).await.unwrap();

        fx.clock.advance(Duration::seconds(5));
        let outcome = fx.coordinator.refresh("e1", true, false).await.unwrap();

        assert_eq!(outcome.kind(), "refreshed");
        assert_eq!(outcome.analysis().unwrap().version, 2);
        assert_eq!(fx.engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let fx = fixture(ScriptedEngine::new()).await;
        let err = fx.coordinator.refresh("ghost", true, false).await.unwrap_err();
        assert!(matches!(err, RefreshError::NotFound(ref id) if id == "ghost"));
        assert_eq!(fx.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_closed_store_is_store_unavailable() {
        let fx = fixture(ScriptedEngine::new()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        fx.store.close().await.unwrap();

        let err = fx.coordinator.refresh("e1", true, false).await.unwrap_err();
        assert!(matches!(err, RefreshError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_forced_refreshes_call_engine_once() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        let coordinator = Arc::new(fx.coordinator);

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, false).await })
        };
        fx.engine.wait_started().await;

        let mut others = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            others.push(tokio::spawn(async move {
                coordinator.refresh("e1", true, false).await
            }));
        }
        for handle in others {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.kind(), "in_progress");
        }

        fx.engine.release_call(0);
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.kind(), "refreshed");
        assert_eq!(fx.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_in_progress_during_lease_window() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("E3", "Cy")).await;
        let coordinator = Arc::new(fx.coordinator);

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("E3", true, false).await })
        };
        fx.engine.wait_started().await;

        fx.clock.advance(Duration::seconds(2));
        let second = coordinator.refresh("E3", true, false).await.unwrap();
        assert_eq!(second, RefreshOutcome::InProgress { started_at: t0() });
        assert_eq!(fx.engine.calls(), 1);

        fx.engine.release_call(0);
        first.await.unwrap().unwrap();
        assert_eq!(fx.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_waiting_caller_gets_in_flight_outcome() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        let coordinator = Arc::new(fx.coordinator);

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, false).await })
        };
        fx.engine.wait_started().await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, true).await })
        };
        while coordinator.leases.waiting_count("e1") == 0 {
            tokio::task::yield_now().await;
        }
        fx.engine.release_call(0);

        let leader = first.await.unwrap().unwrap();
        let follower = waiter.await.unwrap().unwrap();
        assert_eq!(leader, follower);
        assert_eq!(fx.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_late_waiter_gives_up_when_lease_expires() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        let coordinator = Arc::new(fx.coordinator);

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, false).await })
        };
        fx.engine.wait_started().await;

        // 100ms of the 120s lease left.
        fx.clock.advance(Duration::milliseconds(119_900));
        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            coordinator.refresh("e1", true, true),
        )
        .await
        .expect("waiter must stop at lease expiry, not a full TTL later")
        .unwrap();
        assert_eq!(waited, RefreshOutcome::InProgress { started_at: t0() });

        fx.engine.release_call(0);
        first.await.unwrap().unwrap();
        assert_eq!(fx.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_engine_timeout_leaves_cache_untouched() {
        let engine = ScriptedEngine::new().with_delay(std::time::Duration::from_secs(5));
        let policy = RefreshPolicy {
            engine_timeout: std::time::Duration::from_millis(100),
            ..RefreshPolicy::default()
        };
        let fx = fixture_with(engine, policy).await;
        let mut entity = Entity::new("E4", "Dee");
        entity.ai_analysis = Some(AiAnalysis {
            text: "previous".to_string(),
            computed_at: t0() - Duration::days(3),
            version: 7,
        });
        fx.store.upsert_entity(entity.clone()).await;

        let err = fx.coordinator.refresh("E4", true, false).await.unwrap_err();

        assert!(matches!(err, RefreshError::AnalysisFailed { .. }));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(fx.store.get("E4").await.unwrap(), entity);

        // The lease was released, so the next refresh may run.
        assert!(fx.coordinator.leases.current("E4").is_none());
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported_without_write() {
        let engine = ScriptedEngine::new();
        engine.push_response(Err(EngineError::Backend {
            status: 500,
            body: "model not loaded".to_string(),
        }));
        let fx = fixture(engine).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;

        let err = fx.coordinator.refresh("e1", false, false).await.unwrap_err();

        assert!(err.to_string().contains("model not loaded"));
        assert!(fx.store.get("e1").await.unwrap().ai_analysis.is_none());

        // No automatic retry; the caller re-invokes.
        assert_eq!(fx.engine.calls(), 1);
        let retried = fx.coordinator.refresh("e1", false, false).await.unwrap();
        assert_eq!(retried.kind(), "refreshed");
    }

    #[tokio::test]
    async fn test_abandoned_lease_is_taken_over_and_newest_write_wins() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        let coordinator = Arc::new(fx.coordinator);

        let stuck = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, false).await })
        };
        fx.engine.wait_started().await;

        fx.clock.advance(Duration::seconds(121));
        let takeover = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, false).await })
        };
        fx.engine.wait_started().await;
        assert_eq!(fx.engine.calls(), 2);

        // Let the takeover finish first, then the stale worker.
        fx.engine.release_call(1);
        let newer = takeover.await.unwrap().unwrap();
        let newer_analysis = newer.analysis().cloned().unwrap();
        assert_eq!(newer_analysis.computed_at, t0() + Duration::seconds(121));

        fx.engine.release_call(0);
        let older = stuck.await.unwrap().unwrap();
        assert_eq!(older, RefreshOutcome::Superseded(newer_analysis.clone()));

        let stored = coordinator.refresh("e1", false, false).await.unwrap();
        assert_eq!(stored, RefreshOutcome::Cached(newer_analysis));
    }

    #[tokio::test]
    async fn test_cas_retries_after_older_concurrent_write() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("e1", "Ada")).await;
        let coordinator = Arc::new(fx.coordinator);

        let worker = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh("e1", true, false).await })
        };
        fx.engine.wait_started().await;

        // An out-of-band writer lands an older analysis while we compute.
        let older = AiAnalysis {
            text: "older".to_string(),
            computed_at: t0() - Duration::minutes(30),
            version: 1,
        };
        assert!(fx
            .store
            .compare_and_set_analysis("e1", None, RatingStats::default(), older)
            .await
            .unwrap());

        fx.engine.release_call(0);
        let outcome = worker.await.unwrap().unwrap();

        let RefreshOutcome::Refreshed { analysis, .. } = outcome else {
            panic!("expected our newer analysis to win");
        };
        assert_eq!(analysis.computed_at, t0());
        assert_eq!(analysis.version, 2);
        assert_eq!(fx.store.get("e1").await.unwrap().computed_at(), Some(t0()));
    }

    #[tokio::test]
    async fn test_refreshes_of_different_entities_run_in_parallel() {
        let fx = fixture(ScriptedEngine::gated()).await;
        fx.store.upsert_entity(Entity::new("a", "Ada")).await;
        fx.store.upsert_entity(Entity::new("b", "Ben")).await;
        let coordinator = Arc::new(fx.coordinator);

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|id| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.refresh(id, true, false).await })
            })
            .collect();
        fx.engine.wait_started().await;
        fx.engine.wait_started().await;
        assert_eq!(fx.engine.calls(), 2);

        fx.engine.release_call(0);
        fx.engine.release_call(1);
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().kind(), "refreshed");
        }
    }
}
