use std::collections::HashMap;

/// Per-conversation unread counters.
///
/// Counts are unsigned, so they can never go negative. Unknown conversations
/// read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadTracker {
    counts: HashMap<String, u32>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a conversation's count and return the new value.
    pub fn increment(&mut self, conversation_id: &str) -> u32 {
        let count = self.counts.entry(conversation_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&mut self, conversation_id: &str) {
        if let Some(count) = self.counts.get_mut(conversation_id) {
            *count = 0;
        }
    }

    pub fn get(&self, conversation_id: &str) -> u32 {
        self.counts.get(conversation_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.counts.contains_key(conversation_id)
    }

    pub fn set(&mut self, conversation_id: &str, count: u32) {
        self.counts.insert(conversation_id.to_string(), count);
    }

    pub fn remove(&mut self, conversation_id: &str) {
        self.counts.remove(conversation_id);
    }

    /// Sum across all conversations (saturating).
    pub fn total(&self) -> u32 {
        self.counts
            .values()
            .fold(0u32, |acc, n| acc.saturating_add(*n))
    }

    /// Overwrite every tracked count with server-authoritative values.
    ///
    /// Conversations missing from `counts` are dropped, so locally incremented
    /// values never survive a reconciliation.
    pub fn bulk_reconcile(&mut self, counts: HashMap<String, u32>) {
        let drift: usize = counts
            .iter()
            .filter(|(id, n)| self.get(id) != **n)
            .count();
        if drift > 0 {
            tracing::debug!(drift, "Unread counts corrected by reconciliation");
        }
        self.counts = counts;
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Patch;
    use proptest::prelude::*;

    #[test]
    fn test_unknown_conversation_reads_zero() {
        let tracker = UnreadTracker::new();
        assert_eq!(tracker.get("c1"), 0);
    }

    #[test]
    fn test_increment_and_reset() {
        let mut tracker = UnreadTracker::new();
        assert_eq!(tracker.increment("c1"), 1);
        assert_eq!(tracker.increment("c1"), 2);
        tracker.reset("c1");
        assert_eq!(tracker.get("c1"), 0);
    }

    #[test]
    fn test_bulk_reconcile_overrides_local_increments() {
        let mut tracker = UnreadTracker::new();
        tracker.increment("c1");
        tracker.increment("c1");
        tracker.increment("c2");

        tracker.bulk_reconcile(HashMap::from([("c1".to_string(), 5)]));

        assert_eq!(tracker.get("c1"), 5);
        assert_eq!(tracker.get("c2"), 0);
        assert_eq!(tracker.total(), 5);
    }

    #[test]
    fn test_increment_saturates() {
        let mut tracker = UnreadTracker::new();
        tracker.set("c1", u32::MAX);
        assert_eq!(tracker.increment("c1"), u32::MAX);
    }

    #[test]
    fn test_restore_adds_back_cleared_count() {
        let mut tracker = UnreadTracker::new();
        tracker.set("c1", 4);
        assert_eq!(tracker.patch_value("c1", |_| 0), Some(4));
        tracker.increment("c1");

        assert!(tracker.restore("c1", 4));
        assert_eq!(tracker.get("c1"), 5);
    }

    #[test]
    fn test_untracked_conversation_is_not_patched() {
        let mut tracker = UnreadTracker::new();
        tracker.set("c1", 4);
        tracker.remove("c1");

        assert_eq!(tracker.patch_value("c1", |_| 0), None);
        assert!(!tracker.restore("c1", 4));
        assert_eq!(tracker.total(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Increment(u8),
        Reset(u8),
        Reconcile(Vec<(u8, u32)>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..5).prop_map(Op::Increment),
            (0u8..5).prop_map(Op::Reset),
            prop::collection::vec((0u8..5, 0u32..50), 0..5).prop_map(Op::Reconcile),
        ]
    }

    proptest! {
        #[test]
        fn prop_reconcile_overrides_exactly(ops in prop::collection::vec(op_strategy(), 0..30)) {
            let mut tracker = UnreadTracker::new();
            for op in ops {
                match op {
                    Op::Increment(id) => {
                        let before = tracker.get(&id.to_string());
                        let after = tracker.increment(&id.to_string());
                        prop_assert!(after >= before);
                    }
                    Op::Reset(id) => {
                        tracker.reset(&id.to_string());
                        prop_assert_eq!(tracker.get(&id.to_string()), 0);
                    }
                    Op::Reconcile(pairs) => {
                        let counts: HashMap<String, u32> = pairs
                            .into_iter()
                            .map(|(id, n)| (id.to_string(), n))
                            .collect();
                        tracker.bulk_reconcile(counts.clone());
                        for id in 0u8..5 {
                            let key = id.to_string();
                            prop_assert_eq!(tracker.get(&key), counts.get(&key).copied().unwrap_or(0));
                        }
                    }
                }
            }
        }
    }
}
