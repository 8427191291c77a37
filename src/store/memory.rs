//! In-memory document store with an optional JSON snapshot.
//!
//! The snapshot is read on `open` and written back on `flush`/`close`.
//! Several processes may hold the same file: a flush takes an exclusive
//! lock on `<file>.lock`, re-reads the file and merges per entity, keeping
//! whichever analysis has the later `computedAt`. The merged snapshot goes
//! through a temp file and rename, so a crash mid-write never leaves a
//! truncated snapshot behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{EntityStore, ReviewStore};
use crate::error::StoreError;
use crate::models::{AiAnalysis, Entity, EntityId, RatingStats, Review};

/// On-disk layout of the snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    gurus: Vec<Entity>,
    #[serde(default)]
    reviews: Vec<Review>,
}

impl Snapshot {
    /// Folds `ours` into the snapshot read from disk. Entity fields come from
    /// disk; stats and analysis are taken from `ours` only when its analysis
    /// is strictly newer. Entities and reviews the file lacks are added.
    fn merge(self, ours: Snapshot) -> Snapshot {
        let mut entities: BTreeMap<EntityId, Entity> =
            self.gurus.into_iter().map(|e| (e.id.clone(), e)).collect();

        for mine in ours.gurus {
            match entities.get_mut(&mine.id) {
                Some(theirs) => {
                    if mine.computed_at() > theirs.computed_at() {
                        theirs.rating_stats = mine.rating_stats;
                        theirs.ai_analysis = mine.ai_analysis;
                    } else if mine.computed_at() < theirs.computed_at() {
                        debug!(
                            entity_id = %mine.id,
                            "Keeping newer analysis written by another process"
                        );
                    }
                }
                None => {
                    entities.insert(mine.id.clone(), mine);
                }
            }
        }

        let mut reviews = self.reviews;
        let known: HashSet<String> = reviews.iter().map(|r| r.id.clone()).collect();
        reviews.extend(ours.reviews.into_iter().filter(|r| !known.contains(&r.id)));

        Snapshot {
            gurus: entities.into_values().collect(),
            reviews,
        }
    }
}

#[derive(Debug, Default)]
struct Collections {
    entities: BTreeMap<EntityId, Entity>,
    reviews: Vec<Review>,
}

impl From<Snapshot> for Collections {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            entities: snapshot
                .gurus
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect(),
            reviews: snapshot.reviews,
        }
    }
}

impl Collections {
    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            gurus: self.entities.values().cloned().collect(),
            reviews: self.reviews.clone(),
        }
    }
}

/// `<path><suffix>`, next to the data file.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Reads the snapshot at `path`, or `None` if there is no file.
fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read data file: {}", path.display()))
        }
    };
    let snapshot = serde_json::from_str::<Snapshot>(&content)
        .with_context(|| format!("Failed to parse data file: {}", path.display()))?;
    Ok(Some(snapshot))
}

/// Merges `ours` into the file under an exclusive lock and writes the
/// result. Returns what was written.
fn write_merged(path: &Path, ours: Snapshot) -> Result<Snapshot> {
    let lock_path = sibling(path, ".lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

    // Blocks while another process is flushing the same file. Released when
    // `lock_file` drops.
    lock_file
        .lock_exclusive()
        .with_context(|| format!("Failed to lock {}", lock_path.display()))?;

    let merged = match read_snapshot(path)? {
        Some(on_disk) => on_disk.merge(ours),
        None => ours,
    };

    let content = serde_json::to_string_pretty(&merged).context("Failed to serialize snapshot")?;
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(merged)
}

/// Store handle. Create with [`MemoryStore::open`] at startup and
/// [`MemoryStore::close`] it at shutdown.
#[derive(Debug)]
pub struct MemoryStore {
    path: Option<PathBuf>,
    data: RwLock<Collections>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store with no backing file.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(Collections::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens a store backed by `path`. A missing file starts empty and is
    /// created on the first flush; any other I/O error is returned.
    pub async fn open(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to check data file: {}", path.display()))?;

        let snapshot = if exists {
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || read_snapshot(&owned))
                .await
                .context("Snapshot reader task failed")??
                .unwrap_or_default()
        } else {
            info!("Data file {} not found, starting empty", path.display());
            Snapshot::default()
        };

        info!(
            "Opened store {} ({} gurus, {} reviews)",
            path.display(),
            snapshot.gurus.len(),
            snapshot.reviews.len()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            data: RwLock::new(Collections::from(snapshot)),
            closed: AtomicBool::new(false),
        })
    }

    /// Merges this handle's data into the backing file, if there is one, and
    /// reloads the merged result so later reads see other processes' writes.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let mut data = self.data.write().await;
        let ours = data.to_snapshot();
        let target = path.clone();
        let merged = tokio::task::spawn_blocking(move || write_merged(&target, ours))
            .await
            .context("Snapshot writer task failed")??;
        *data = Collections::from(merged);

        debug!("Flushed store to {}", path.display());
        Ok(())
    }

    /// Flushes and marks the handle closed. Later calls fail with
    /// `StoreError::Unavailable`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush().await?;
        info!("Store closed");
        Ok(())
    }

    /// Inserts or replaces an entity.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn upsert_entity(&self, entity: Entity) {
        self.data
            .write()
            .await
            .entities
            .insert(entity.id.clone(), entity);
    }

    /// Appends a review.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn insert_review(&self, review: Review) {
        self.data.write().await.reviews.push(review);
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn find_visible_by_entity(&self, entity_id: &str) -> Result<Vec<Review>, StoreError> {
        self.ensure_open()?;
        let data = self.data.read().await;
        Ok(data
            .reviews
            .iter()
            .filter(|r| r.entity_id == entity_id && !r.hidden)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, entity_id: &str) -> Result<Entity, StoreError> {
        self.ensure_open()?;
        let data = self.data.read().await;
        data.entities
            .get(entity_id)
            .cloned()
            .ok_or_else(|| StoreError::EntityNotFound(entity_id.to_string()))
    }

    async fn compare_and_set_analysis(
        &self,
        entity_id: &str,
        expected_computed_at: Option<DateTime<Utc>>,
        stats: RatingStats,
        analysis: AiAnalysis,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut data = self.data.write().await;
        let entity = data
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| StoreError::EntityNotFound(entity_id.to_string()))?;

        let stored = entity.computed_at();
        if stored != expected_computed_at {
            debug!(entity_id, ?stored, ?expected_computed_at, "CAS rejected: stale expectation");
            return Ok(false);
        }
        if stored.is_some_and(|current| analysis.computed_at <= current) {
            debug!(entity_id, ?stored, new = %analysis.computed_at, "CAS rejected: not newer");
            return Ok(false);
        }

        entity.rating_stats = stats;
        entity.ai_analysis = Some(analysis);
        Ok(true)
    }

    async fn list_ids(&self) -> Result<Vec<EntityId>, StoreError> {
        self.ensure_open()?;
        Ok(self.data.read().await.entities.keys().cloned().collect())
    }
}
