//! Sliding-window hit counter
//!
//! Counts administrative actions per (actor, category) over a short horizon.
//! Buckets live only in memory; losing them on restart is an accepted
//! tradeoff since the window only needs to catch short bursts.

use crate::protection::policy::{ProtectionCategory, RateThreshold};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

type RateKey = (u64, ProtectionCategory);

#[derive(Debug, Default)]
struct Bucket {
    hits: Vec<DateTime<Utc>>,
    /// Set once a threshold fires, cleared when the bucket drains and a new
    /// window starts. Keeps one burst from firing on every subsequent hit.
    consumed: bool,
}

impl Bucket {
    fn prune(&mut self, window_seconds: u32, now: DateTime<Utc>) {
        // The window is inclusive: a hit exactly window_seconds old still
        // counts
        let cutoff = now - Duration::seconds(i64::from(window_seconds));
        self.hits.retain(|t| *t >= cutoff);
        if self.hits.is_empty() {
            self.consumed = false;
        }
    }
}

/// Per-actor, per-category sliding windows
#[derive(Default)]
pub struct RateWindow {
    buckets: DashMap<RateKey, Bucket>,
}

impl RateWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit and return the number of hits still inside the window.
    /// Synchronous; the whole read-modify-write runs under one entry lock.
    pub fn hit(
        &self,
        actor_id: u64,
        category: ProtectionCategory,
        window_seconds: u32,
        now: DateTime<Utc>,
    ) -> usize {
        let mut bucket = self.buckets.entry((actor_id, category)).or_default();
        bucket.prune(window_seconds, now);
        bucket.hits.push(now);
        bucket.hits.len()
    }

    /// Record a hit and report whether the threshold fired. Fires at most
    /// once per window: the first hit that reaches `threshold.count` returns
    /// true, later hits inside the same window return false.
    pub fn threshold_crossed(
        &self,
        actor_id: u64,
        category: ProtectionCategory,
        threshold: &RateThreshold,
        now: DateTime<Utc>,
    ) -> bool {
        let mut bucket = self.buckets.entry((actor_id, category)).or_default();
        // Prune before appending so a fully drained bucket opens a new window
        // and clears its consumed flag.
        bucket.prune(threshold.window_seconds, now);
        bucket.hits.push(now);

        if bucket.consumed || bucket.hits.len() < threshold.count {
            return false;
        }
        bucket.consumed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAT: ProtectionCategory = ProtectionCategory::MassChannelDelete;

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + Duration::seconds(secs)
    }

    #[test]
    fn test_hit_counts_only_inside_window() {
        let window = RateWindow::new();
        let t0 = Utc::now();

        assert_eq!(window.hit(1, CAT, 30, at(t0, 0)), 1);
        assert_eq!(window.hit(1, CAT, 30, at(t0, 5)), 2);
        assert_eq!(window.hit(1, CAT, 30, at(t0, 10)), 3);
        // First two hits have aged out by t0+40
        assert_eq!(window.hit(1, CAT, 30, at(t0, 40)), 2);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let window = RateWindow::new();
        let t0 = Utc::now();

        window.hit(1, CAT, 30, t0);
        // A hit exactly 30 seconds old is still inside a 30-second window
        assert_eq!(window.hit(1, CAT, 30, at(t0, 30)), 2);
        // One second later it is out
        assert_eq!(window.hit(1, CAT, 30, at(t0, 31)), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let window = RateWindow::new();
        let t0 = Utc::now();

        assert_eq!(window.hit(1, CAT, 30, t0), 1);
        assert_eq!(window.hit(2, CAT, 30, t0), 1);
        assert_eq!(window.hit(1, ProtectionCategory::MassBan, 30, t0), 1);
        assert_eq!(window.hit(1, CAT, 30, t0), 2);
    }

    #[test]
    fn test_threshold_fires_once_per_window() {
        let window = RateWindow::new();
        let t0 = Utc::now();
        let threshold = RateThreshold {
            count: 3,
            window_seconds: 30,
        };

        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 0)));
        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 5)));
        // Third hit reaches the threshold
        assert!(window.threshold_crossed(1, CAT, &threshold, at(t0, 10)));
        // Further hits inside the same window stay consumed
        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 12)));
        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 15)));
    }

    #[test]
    fn test_threshold_resets_after_window_drains() {
        let window = RateWindow::new();
        let t0 = Utc::now();
        let threshold = RateThreshold {
            count: 2,
            window_seconds: 10,
        };

        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 0)));
        assert!(window.threshold_crossed(1, CAT, &threshold, at(t0, 1)));
        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 2)));

        // Everything before has aged out; a fresh burst fires again
        assert!(!window.threshold_crossed(1, CAT, &threshold, at(t0, 60)));
        assert!(window.threshold_crossed(1, CAT, &threshold, at(t0, 61)));
    }
}
