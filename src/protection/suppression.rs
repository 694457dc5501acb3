//! Suppression markers
//!
//! Short-TTL marker set keeping the engine's own corrective writes from being
//! re-evaluated as fresh violations. A marker suppresses detection for one
//! entity only. Entries expire by time, lazily on read; there is no explicit
//! unmark path.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Grace window applied before the engine's own corrective writes
pub const ROLLBACK_GRACE_SECONDS: u32 = 3;

#[derive(Default)]
pub struct SuppressionRegistry {
    markers: DashMap<u64, DateTime<Utc>>,
}

impl SuppressionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an entity as suppressed for `ttl_seconds` from now
    pub fn mark(&self, entity_id: u64, ttl_seconds: u32) {
        self.mark_at(entity_id, ttl_seconds, Utc::now());
    }

    /// Check whether an entity is currently suppressed
    pub fn is_marked(&self, entity_id: u64) -> bool {
        self.is_marked_at(entity_id, Utc::now())
    }

    pub fn mark_at(&self, entity_id: u64, ttl_seconds: u32, now: DateTime<Utc>) {
        let expires_at = now + Duration::seconds(i64::from(ttl_seconds));
        self.markers.insert(entity_id, expires_at);
    }

    pub fn is_marked_at(&self, entity_id: u64, now: DateTime<Utc>) -> bool {
        match self.markers.get(&entity_id) {
            Some(entry) if *entry.value() > now => true,
            Some(entry) => {
                let id = *entry.key();
                drop(entry);
                self.markers.remove(&id);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_suppresses_within_ttl() {
        let registry = SuppressionRegistry::new();
        let t0 = Utc::now();

        registry.mark_at(42, 3, t0);
        assert!(registry.is_marked_at(42, t0));
        assert!(registry.is_marked_at(42, t0 + Duration::seconds(2)));
        // Other entities are unaffected
        assert!(!registry.is_marked_at(43, t0));
    }

    #[test]
    fn test_marker_expires_after_ttl() {
        let registry = SuppressionRegistry::new();
        let t0 = Utc::now();

        registry.mark_at(42, 3, t0);
        assert!(!registry.is_marked_at(42, t0 + Duration::seconds(4)));
        // Expired entry was lazily removed
        assert!(!registry.is_marked_at(42, t0));
    }

    #[test]
    fn test_remark_extends_ttl() {
        let registry = SuppressionRegistry::new();
        let t0 = Utc::now();

        registry.mark_at(42, 3, t0);
        registry.mark_at(42, 3, t0 + Duration::seconds(2));
        assert!(registry.is_marked_at(42, t0 + Duration::seconds(4)));
        assert!(!registry.is_marked_at(42, t0 + Duration::seconds(6)));
    }
}
