//! Sanction store
//!
//! Durable record keeping for sanctions. Records live in a concurrent map and
//! are snapshotted to a YAML file after every mutation; the file is reloaded
//! at startup. The "mark ended" write is conditional on the record still
//! being active, which is what serializes the sweep path against manual
//! release: whichever writer actually flips the record performs the side
//! effect, the other sees a no-op.

use crate::SANCTION_TARGET;
use crate::sanction::error::{SanctionError, SanctionResult};
use crate::sanction::record::{Sanction, SanctionScope, end_reason};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

type ActiveKey = (u64, u64, SanctionScope);

/// Store for sanction records
#[derive(Clone)]
pub struct SanctionStore {
    records: Arc<DashMap<String, Sanction>>,
    /// Id of the active record per (guild, subject, scope). Its entry lock
    /// makes supersede-and-insert one step, so two concurrent creates for
    /// the same key cannot both leave an active record behind.
    active_index: Arc<DashMap<ActiveKey, String>>,
    /// YAML snapshot path; None keeps the store memory-only (tests)
    path: Option<PathBuf>,
}

impl Default for SanctionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SanctionStore {
    /// Create a memory-only store
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            active_index: Arc::new(DashMap::new()),
            path: None,
        }
    }

    /// Create a store backed by a YAML file, loading any existing records
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = DashMap::new();

        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            match serde_yaml::from_str::<Vec<Sanction>>(&content) {
                Ok(sanctions) => {
                    for sanction in sanctions {
                        records.insert(sanction.id.clone(), sanction);
                    }
                    info!(
                        target: SANCTION_TARGET,
                        count = records.len(),
                        path = %path.display(),
                        "Loaded sanction records"
                    );
                }
                Err(e) => {
                    error!(
                        target: SANCTION_TARGET,
                        path = %path.display(),
                        error = %e,
                        "Failed to parse sanction records, starting empty"
                    );
                }
            }
        }

        let active_index = DashMap::new();
        for entry in records.iter() {
            let s = entry.value();
            if s.is_active() {
                active_index.insert((s.guild_id, s.subject_id, s.scope), s.id.clone());
            }
        }

        Self {
            records: Arc::new(records),
            active_index: Arc::new(active_index),
            path: Some(path),
        }
    }

    /// Snapshot all records to the backing file, best effort
    pub async fn save(&self) -> SanctionResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| SanctionError::Persistence(e.to_string()))?;
            }
        }

        let sanctions: Vec<Sanction> = self.records.iter().map(|e| e.value().clone()).collect();
        let yaml = serde_yaml::to_string(&sanctions)
            .map_err(|e| SanctionError::Persistence(e.to_string()))?;
        tokio::fs::write(path, yaml)
            .await
            .map_err(|e| SanctionError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// Insert a new sanction, superseding any existing active record for the
    /// same (guild, subject, scope). Upholds the at-most-one-active
    /// invariant; superseded records keep their history. The whole
    /// supersede-and-insert runs under the index entry lock, so concurrent
    /// creates for one key serialize.
    pub fn create(&self, sanction: Sanction) -> Sanction {
        let key = (sanction.guild_id, sanction.subject_id, sanction.scope);
        let now = Utc::now();

        match self.active_index.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(mut existing) = self.records.get_mut(occupied.get()) {
                    if existing.is_active() {
                        // Cannot fail: we just checked it is active
                        let _ = existing.end(end_reason::SUPERSEDED, None, now);
                    }
                }
                self.records.insert(sanction.id.clone(), sanction.clone());
                occupied.insert(sanction.id.clone());
            }
            Entry::Vacant(vacant) => {
                self.records.insert(sanction.id.clone(), sanction.clone());
                vacant.insert(sanction.id.clone());
            }
        }
        sanction
    }

    /// Get a sanction by ID
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Sanction> {
        self.records.get(id).map(|e| e.value().clone())
    }

    /// The active sanction for a subject in a scope, if any
    #[must_use]
    pub fn find_active(
        &self,
        guild_id: u64,
        subject_id: u64,
        scope: SanctionScope,
    ) -> Option<Sanction> {
        self.records.iter().find_map(|entry| {
            let s = entry.value();
            (s.guild_id == guild_id
                && s.subject_id == subject_id
                && s.scope == scope
                && s.is_active())
            .then(|| s.clone())
        })
    }

    /// All currently active sanctions, across guilds
    #[must_use]
    pub fn all_active(&self) -> Vec<Sanction> {
        self.records
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Active sanctions for a guild
    #[must_use]
    pub fn active_for_guild(&self, guild_id: u64) -> Vec<Sanction> {
        self.records
            .iter()
            .filter(|e| e.value().guild_id == guild_id && e.value().is_active())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Active sanctions whose expiry has passed at `now`
    #[must_use]
    pub fn find_expired(&self, now: DateTime<Utc>) -> Vec<Sanction> {
        self.records
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Conditionally end a sanction.
    ///
    /// Returns `Ok(Some(record))` when this call performed the transition,
    /// `Ok(None)` when another path already ended it (treated as success by
    /// another writer, the caller must skip its side effect).
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id.
    pub fn mark_ended(
        &self,
        id: &str,
        reason: &str,
        ended_by: Option<u64>,
    ) -> SanctionResult<Option<Sanction>> {
        let ended = {
            let Some(mut entry) = self.records.get_mut(id) else {
                return Err(SanctionError::NotFound(id.to_string()));
            };

            let record = entry.value_mut();
            if !record.is_active() {
                return Ok(None);
            }

            // Cannot fail after the active check; entry lock is held throughout
            let _ = record.end(reason, ended_by, Utc::now());
            record.clone()
        };

        // Record lock is released before touching the index; a concurrent
        // create may already have repointed the key at a newer record
        self.active_index
            .remove_if(&(ended.guild_id, ended.subject_id, ended.scope), |_, v| {
                v.as_str() == id
            });
        Ok(Some(ended))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanction(guild: u64, subject: u64, scope: SanctionScope) -> Sanction {
        Sanction::new(guild, subject, scope, 99, "test", Some(300))
    }

    fn count_active(store: &SanctionStore, guild: u64, subject: u64, scope: SanctionScope) -> usize {
        store
            .records
            .iter()
            .filter(|e| {
                let s = e.value();
                s.guild_id == guild && s.subject_id == subject && s.scope == scope && s.is_active()
            })
            .count()
    }

    #[test]
    fn test_create_and_find_active() {
        let store = SanctionStore::new();
        let created = store.create(sanction(1, 2, SanctionScope::VoiceMute));

        let found = store.find_active(1, 2, SanctionScope::VoiceMute).unwrap();
        assert_eq!(found.id, created.id);

        // Different scope or subject finds nothing
        assert!(store.find_active(1, 2, SanctionScope::ChatMute).is_none());
        assert!(store.find_active(1, 3, SanctionScope::VoiceMute).is_none());
    }

    #[test]
    fn test_create_supersedes_existing_active() {
        let store = SanctionStore::new();
        let first = store.create(sanction(1, 2, SanctionScope::VoiceMute));
        let second = store.create(sanction(1, 2, SanctionScope::VoiceMute));

        // At most one active record per (guild, subject, scope)
        assert_eq!(count_active(&store, 1, 2, SanctionScope::VoiceMute), 1);
        assert_eq!(
            store.find_active(1, 2, SanctionScope::VoiceMute).unwrap().id,
            second.id
        );

        // The superseded record is kept as history
        let old = store.get(&first.id).unwrap();
        assert!(!old.is_active());
        assert_eq!(old.ended_reason.as_deref(), Some("superseded"));
    }

    #[test]
    fn test_supersede_ignores_other_scopes() {
        let store = SanctionStore::new();
        let voice = store.create(sanction(1, 2, SanctionScope::VoiceMute));
        store.create(sanction(1, 2, SanctionScope::ChatMute));

        assert!(store.get(&voice.id).unwrap().is_active());
        assert_eq!(count_active(&store, 1, 2, SanctionScope::VoiceMute), 1);
        assert_eq!(count_active(&store, 1, 2, SanctionScope::ChatMute), 1);
    }

    #[test]
    fn test_mark_ended_is_conditional() {
        let store = SanctionStore::new();
        let created = store.create(sanction(1, 2, SanctionScope::Timeout));

        // First writer wins and gets the record back
        let first = store
            .mark_ended(&created.id, end_reason::EXPIRED, None)
            .unwrap();
        assert!(first.is_some());

        // Second writer sees a no-op, not an error
        let second = store
            .mark_ended(&created.id, end_reason::RELEASED, Some(7))
            .unwrap();
        assert!(second.is_none());

        // The winning write's fields stuck
        let stored = store.get(&created.id).unwrap();
        assert_eq!(stored.ended_reason.as_deref(), Some("expired"));
        assert_eq!(stored.ended_by, None);
    }

    #[test]
    fn test_mark_ended_unknown_id() {
        let store = SanctionStore::new();
        assert!(matches!(
            store.mark_ended("missing", end_reason::EXPIRED, None),
            Err(SanctionError::NotFound(_))
        ));
    }

    #[test]
    fn test_find_expired_only_returns_due_active() {
        let store = SanctionStore::new();
        let timed = store.create(sanction(1, 2, SanctionScope::VoiceMute));
        store.create(Sanction::new(1, 3, SanctionScope::VoiceMute, 99, "x", None));

        let before = timed.expires_at.unwrap() - chrono::Duration::seconds(1);
        assert!(store.find_expired(before).is_empty());

        let after = timed.expires_at.unwrap() + chrono::Duration::seconds(1);
        let expired = store.find_expired(after);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, timed.id);

        // Once ended, it is no longer reported
        store
            .mark_ended(&timed.id, end_reason::EXPIRED, None)
            .unwrap();
        assert!(store.find_expired(after).is_empty());
    }

    #[test]
    fn test_concurrent_creates_leave_one_active() {
        use std::sync::{Arc, Barrier};

        // Two racing creates for the same key must serialize on the index
        // entry lock; whichever lands second supersedes the first.
        let store = SanctionStore::new();
        // Unrelated records widen the window the old scan-based supersede
        // left open
        for subject in 100..120 {
            store.create(sanction(1, subject, SanctionScope::ChatMute));
        }

        for _ in 0..200 {
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = store.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.create(sanction(1, 2, SanctionScope::VoiceMute));
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(count_active(&store, 1, 2, SanctionScope::VoiceMute), 1);
        }
    }

    #[test]
    fn test_at_most_one_active_over_mixed_operations() {
        let store = SanctionStore::new();
        let a = store.create(sanction(1, 2, SanctionScope::ChatMute));
        let b = store.create(sanction(1, 2, SanctionScope::ChatMute));
        store
            .mark_ended(&b.id, end_reason::RELEASED, Some(9))
            .unwrap();
        let c = store.create(sanction(1, 2, SanctionScope::ChatMute));

        assert_eq!(count_active(&store, 1, 2, SanctionScope::ChatMute), 1);
        assert_eq!(
            store.find_active(1, 2, SanctionScope::ChatMute).unwrap().id,
            c.id
        );
        // History is intact
        assert!(store.get(&a.id).is_some());
        assert!(store.get(&b.id).is_some());
    }
}
