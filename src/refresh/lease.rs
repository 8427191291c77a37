//! Per-entity in-flight refresh leases.
//!
//! At most one live lease exists per entity id. The holder broadcasts its
//! outcome to every caller that chose to wait on it. Leases expire after a
//! TTL so a worker that never comes back cannot block an entity forever;
//! the next request takes the lease over under a new generation, and the
//! stale holder's release becomes a no-op.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::RefreshError;
use crate::models::{EntityId, RefreshOutcome};

/// Result shared between the lease holder and its waiters.
pub type SharedOutcome = Result<RefreshOutcome, RefreshError>;

struct Lease {
    generation: u64,
    started_at: DateTime<Utc>,
    sender: broadcast::Sender<SharedOutcome>,
}

/// A live lease held by somebody else.
pub struct Busy {
    pub started_at: DateTime<Utc>,
    pub receiver: broadcast::Receiver<SharedOutcome>,
}

/// Result of [`LeaseTable::try_acquire`].
pub enum Acquire {
    Acquired(LeaseGuard),
    Busy(Busy),
}

/// Table of in-flight refreshes keyed by entity id.
pub struct LeaseTable {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<EntityId, Lease>>,
    next_generation: AtomicU64,
}

impl LeaseTable {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            clock,
            leases: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, Lease>> {
        // The map stays consistent even if a holder panicked mid-release.
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time left before a lease taken at `started_at` expires. Zero once it
    /// has.
    pub fn remaining(&self, started_at: DateTime<Utc>) -> std::time::Duration {
        let left = self.ttl - (self.clock.now() - started_at);
        left.to_std().unwrap_or(std::time::Duration::ZERO)
    }

    fn is_expired(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        now - lease.started_at >= self.ttl
    }

    /// The live (unexpired) lease for `entity_id`, if any, with a receiver
    /// for its outcome.
    pub fn current(&self, entity_id: &str) -> Option<Busy> {
        let now = self.clock.now();
        let leases = self.lock();
        leases
            .get(entity_id)
            .filter(|lease| !self.is_expired(lease, now))
            .map(|lease| Busy {
                started_at: lease.started_at,
                receiver: lease.sender.subscribe(),
            })
    }

    /// Atomically creates a lease for `entity_id` unless a live one exists.
    /// An expired lease is treated as abandoned and replaced.
    pub fn try_acquire(self: &Arc<Self>, entity_id: &str) -> Acquire {
        let now = self.clock.now();
        let mut leases = self.lock();

        if let Some(existing) = leases.get(entity_id) {
            if !self.is_expired(existing, now) {
                return Acquire::Busy(Busy {
                    started_at: existing.started_at,
                    receiver: existing.sender.subscribe(),
                });
            }
            warn!(
                entity_id,
                abandoned_generation = existing.generation,
                started_at = %existing.started_at,
                "Taking over expired refresh lease"
            );
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (sender, _) = broadcast::channel(1);
        leases.insert(
            entity_id.to_string(),
            Lease {
                generation,
                started_at: now,
                sender: sender.clone(),
            },
        );
        debug!(entity_id, generation, "Acquired refresh lease");

        Acquire::Acquired(LeaseGuard {
            table: Arc::clone(self),
            entity_id: entity_id.to_string(),
            generation,
            started_at: now,
            sender: Some(sender),
        })
    }

    /// Callers currently waiting on the lease for `entity_id`.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn waiting_count(&self, entity_id: &str) -> usize {
        self.lock()
            .get(entity_id)
            .map_or(0, |lease| lease.sender.receiver_count())
    }

    /// Number of live or expired-but-unreleased leases.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    /// Removes the lease if it still belongs to `generation`, broadcasting
    /// `outcome` first. Both happen under the table lock so a caller either
    /// subscribed in time to see the outcome or finds no lease at all.
    fn release(
        &self,
        entity_id: &str,
        generation: u64,
        sender: Option<broadcast::Sender<SharedOutcome>>,
        outcome: Option<SharedOutcome>,
    ) {
        let mut leases = self.lock();

        if let (Some(sender), Some(outcome)) = (&sender, outcome) {
            let waiting = sender.receiver_count();
            // No receivers is fine; nobody chose to wait.
            let _ = sender.send(outcome);
            debug!(entity_id, generation, waiting, "Broadcast refresh outcome");
        }

        match leases.get(entity_id) {
            Some(lease) if lease.generation == generation => {
                leases.remove(entity_id);
                debug!(entity_id, generation, "Released refresh lease");
            }
            Some(lease) => {
                debug!(
                    entity_id,
                    generation,
                    current_generation = lease.generation,
                    "Lease was taken over, leaving successor in place"
                );
            }
            None => {}
        }
    }
}

/// Ownership of one entity's lease. Dropping it without calling
/// [`LeaseGuard::complete`] releases the lease and closes the channel, which
/// waiters observe as an abandoned refresh.
pub struct LeaseGuard {
    table: Arc<LeaseTable>,
    entity_id: EntityId,
    generation: u64,
    started_at: DateTime<Utc>,
    sender: Option<broadcast::Sender<SharedOutcome>>,
}

impl LeaseGuard {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Publishes the outcome to waiters and releases the lease.
    pub fn complete(mut self, outcome: SharedOutcome) {
        let sender = self.sender.take();
        self.table
            .release(&self.entity_id, self.generation, sender, Some(outcome));
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            warn!(
                entity_id = %self.entity_id,
                generation = self.generation,
                "Refresh ended without an outcome, releasing lease"
            );
            self.table
                .release(&self.entity_id, self.generation, Some(sender), None);
        }
    }
}
