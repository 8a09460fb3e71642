//! Transient call-id -> downstream record id mapping

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::RecordId;

/// Downstream ids created so far for one physical call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Ongoing-call record created at ring time.
    pub telephony_event_id: Option<RecordId>,
    /// Completed-call record created at end time.
    pub phone_log_id: Option<RecordId>,
    pub first_seen: Instant,
}

/// Fields to merge into a [`CallRecord`]. Unset fields leave the stored
/// value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRecordPatch {
    pub telephony_event_id: Option<RecordId>,
    pub phone_log_id: Option<RecordId>,
}

impl CallRecordPatch {
    pub fn telephony_event(id: RecordId) -> Self {
        Self {
            telephony_event_id: Some(id),
            ..Self::default()
        }
    }

    pub fn phone_log(id: RecordId) -> Self {
        Self {
            phone_log_id: Some(id),
            ..Self::default()
        }
    }
}

impl CallRecord {
    pub fn new(first_seen: Instant) -> Self {
        Self {
            telephony_event_id: None,
            phone_log_id: None,
            first_seen,
        }
    }

    /// Shallow merge: fields set in `patch` win, the rest are kept.
    pub fn merged(self, patch: CallRecordPatch) -> Self {
        Self {
            telephony_event_id: patch.telephony_event_id.or(self.telephony_event_id),
            phone_log_id: patch.phone_log_id.or(self.phone_log_id),
            first_seen: self.first_seen,
        }
    }
}

/// Storage for in-flight call records. Shared across concurrently handled
/// webhook deliveries.
pub trait CorrelationStore: Send + Sync {
    /// Insert or merge, returning the resulting record.
    fn merge(&self, call_id: &str, patch: CallRecordPatch) -> CallRecord;

    fn get(&self, call_id: &str) -> Option<CallRecord>;

    /// Remove a record. Removing an absent key is a no-op.
    fn remove(&self, call_id: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records first seen more than `max_age` ago. Returns how many
    /// were removed.
    fn sweep(&self, max_age: Duration) -> usize;
}

/// In-memory [`CorrelationStore`]. Entries live until removed or swept.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CallRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, CallRecord>> {
        // A panic while holding the lock cannot leave a half-written record.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sweep_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, r| now.saturating_duration_since(r.first_seen) < max_age);
        before - records.len()
    }
}

impl CorrelationStore for MemoryStore {
    fn merge(&self, call_id: &str, patch: CallRecordPatch) -> CallRecord {
        let mut records = self.records();
        let current = records
            .remove(call_id)
            .unwrap_or_else(|| CallRecord::new(Instant::now()));
        let merged = current.merged(patch);
        records.insert(call_id.to_string(), merged.clone());
        merged
    }

    fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.records().get(call_id).cloned()
    }

    fn remove(&self, call_id: &str) {
        self.records().remove(call_id);
    }

    fn len(&self) -> usize {
        self.records().len()
    }

    fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(Instant::now(), max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> RecordId {
        RecordId::new(s)
    }

    #[test]
    fn test_merge_inserts_when_absent() {
        let store = MemoryStore::new();
        let record = store.merge("c1", CallRecordPatch::telephony_event(id("10")));
        assert_eq!(record.telephony_event_id, Some(id("10")));
        assert!(record.phone_log_id.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_merge_preserves_unmentioned_fields() {
        let store = MemoryStore::new();
        store.merge("c1", CallRecordPatch::telephony_event(id("10")));
        let record = store.merge("c1", CallRecordPatch::phone_log(id("20")));

        assert_eq!(record.telephony_event_id, Some(id("10")));
        assert_eq!(record.phone_log_id, Some(id("20")));
        assert_eq!(store.get("c1"), Some(record));
    }

    #[test]
    fn test_merge_overwrites_same_field() {
        let store = MemoryStore::new();
        let first = store.merge("c1", CallRecordPatch::phone_log(id("20")));
        let second = store.merge("c1", CallRecordPatch::phone_log(id("21")));
        assert_eq!(second.phone_log_id, Some(id("21")));
        assert_eq!(second.first_seen, first.first_seen);
    }

    #[test]
    fn test_get_absent() {
        let store = MemoryStore::new();
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = MemoryStore::new();
        store.merge("c1", CallRecordPatch::phone_log(id("20")));

        store.remove("c1");
        store.remove("c1");
        store.remove("never-seen");

        assert!(store.get("c1").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_merged_is_pure() {
        let base = CallRecord::new(Instant::now());
        let merged = base.clone().merged(CallRecordPatch::default());
        assert_eq!(merged, base);
    }

    #[test]
    fn test_sweep_removes_only_old_records() {
        let store = MemoryStore::new();
        store.merge("old", CallRecordPatch::phone_log(id("1")));
        store.merge("new", CallRecordPatch::phone_log(id("2")));

        let later = Instant::now() + Duration::from_secs(120);
        {
            let mut records = store.records();
            if let Some(r) = records.get_mut("new") {
                r.first_seen = later;
            }
        }

        let removed = store.sweep_at(later + Duration::from_secs(30), Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn test_concurrent_merges_keep_both_fields() {
        for _ in 0..50 {
            let store = Arc::new(MemoryStore::new());

            let a = {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.merge("c1", CallRecordPatch::telephony_event(id("10")));
                })
            };
            let b = {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.merge("c1", CallRecordPatch::phone_log(id("20")));
                })
            };
            a.join().unwrap();
            b.join().unwrap();

            let record = store.get("c1").unwrap();
            assert_eq!(record.telephony_event_id, Some(id("10")));
            assert_eq!(record.phone_log_id, Some(id("20")));
        }
    }
}
