//! In-memory view of the item registry plus per-item locking.
//!
//! [`StateManager`] loads every persisted [`ItemRecord`] at startup,
//! repairs rows whose flags disagree with their payload (a crash between
//! writes can leave e.g. `categorized` set with no category triple), and
//! serves clones to the orchestrator. All writes go through
//! [`StateManager::update_item`] so the registry row and the in-memory
//! copy never drift.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use magpie_shared::{ItemRecord, Phase, Result, RunPrefs};
use magpie_storage::Registry;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

pub struct StateManager {
    registry: Arc<Registry>,
    items: Mutex<HashMap<String, ItemRecord>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateManager {
    /// Loads all items from the registry, repairing any row whose
    /// completion flags are inconsistent with its stored payload.
    pub async fn load(registry: Arc<Registry>) -> Result<Self> {
        let mut items = HashMap::new();
        for mut record in registry.list_items().await? {
            if reconcile(&mut record) {
                warn!(id = %record.id, "repaired inconsistent registry row");
                record.updated_at = Utc::now();
                registry.upsert_item(&record).await?;
            }
            items.insert(record.id.clone(), record);
        }
        Ok(Self {
            registry,
            items: Mutex::new(items),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Returns the tracked record for `id`, or creates and persists a
    /// fresh one for a newly discovered item.
    pub async fn load_or_create(&self, id: &str, source_url: &str) -> Result<ItemRecord> {
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }
        if let Some(mut record) = self.registry.get_item(id).await? {
            if reconcile(&mut record) {
                warn!(id = %record.id, "repaired inconsistent registry row");
                record.updated_at = Utc::now();
                self.registry.upsert_item(&record).await?;
            }
            self.insert(record.clone());
            return Ok(record);
        }
        let record = ItemRecord::new(id, source_url);
        self.registry.upsert_item(&record).await?;
        self.insert(record.clone());
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<ItemRecord> {
        self.lock_items().get(id).cloned()
    }

    /// All tracked ids, sorted for deterministic scheduling.
    pub fn item_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_items().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Persists `record` and refreshes the in-memory copy. Bumps
    /// `updated_at` so every phase attempt leaves a visible trace.
    pub async fn update_item(&self, record: &mut ItemRecord) -> Result<()> {
        record.updated_at = Utc::now();
        self.registry.upsert_item(record).await?;
        self.insert(record.clone());
        Ok(())
    }

    /// Acquires the per-item mutex for `id`. Two tasks can never run
    /// phases for the same item concurrently.
    pub async fn lock_item(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Decides whether `phase` should run for `record` under `prefs`.
    pub fn should_process_phase(
        &self,
        record: &ItemRecord,
        phase: Phase,
        prefs: &RunPrefs,
    ) -> bool {
        if !prefs.allows(phase) || !phase.applies_to(record) {
            return false;
        }
        if phase.is_done(record) && !prefs.forces(phase) {
            return false;
        }
        if !phase.prerequisites_met(record) {
            return false;
        }
        if phase == Phase::Synthesize && !self.group_ready(record) {
            return false;
        }
        true
    }

    /// Synthesis covers a whole (main, sub) group; it only makes sense
    /// once every member of the group has a generated document.
    fn group_ready(&self, record: &ItemRecord) -> bool {
        if !record.kb_item_generated {
            return false;
        }
        let Some((main, sub, _)) = record.category() else {
            return false;
        };
        self.lock_items().values().all(|other| match other.category() {
            Some((m, s, _)) if m == main && s == sub => other.kb_item_generated,
            _ => true,
        })
    }

    fn insert(&self, record: ItemRecord) {
        self.lock_items().insert(record.id.clone(), record);
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, HashMap<String, ItemRecord>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Demotes completion flags that the stored payload cannot back up, then
/// clears everything downstream of a demoted flag. Returns true if the
/// record changed.
fn reconcile(record: &mut ItemRecord) -> bool {
    let before = flags(record);
    if record.cached && record.raw_content.is_none() {
        record.cached = false;
    }
    if record.categorized && record.category().is_none() {
        record.categorized = false;
    }
    if record.kb_item_generated && record.kb_item_path.is_none() {
        record.kb_item_generated = false;
    }
    if !record.cached {
        record.media_processed = false;
        record.categorized = false;
    }
    if !record.categorized {
        record.kb_item_generated = false;
    }
    if !record.kb_item_generated {
        record.synthesized = false;
        record.embedded = false;
        record.synced = false;
    }
    before != flags(record)
}

fn flags(record: &ItemRecord) -> [bool; 7] {
    [
        record.cached,
        record.media_processed,
        record.categorized,
        record.kb_item_generated,
        record.synthesized,
        record.embedded,
        record.synced,
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
