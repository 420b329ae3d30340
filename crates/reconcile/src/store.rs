use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::model::{cmp_newest_first, ObservedAt, Record, RecordId};

/// What a merge did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
}

/// Deduplicating merge target keyed by composite ID.
///
/// At most one record per ID; a later merge with the same ID replaces the
/// earlier one. The store has a single owner: concurrent fetch workers hand
/// their results back to that owner instead of sharing the map.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordStore {
    records: BTreeMap<RecordId, Record>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, record: Record) -> MergeOutcome {
        match self.records.entry(record.id().clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                MergeOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                if slot.get() != &record {
                    log::debug!("record {} changed between fetches; keeping latest", record.id());
                }
                slot.insert(record);
                MergeOutcome::Replaced
            }
        }
    }

    /// Merge a batch, returning how many IDs were new.
    pub fn merge_all(&mut self, records: impl IntoIterator<Item = Record>) -> usize {
        let mut inserted = 0;
        for record in records {
            if self.merge(record) == MergeOutcome::Inserted {
                inserted += 1;
            }
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    /// Keys in (partition, sequence) order.
    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.records.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Record count per partition.
    pub fn partition_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for id in self.records.keys() {
            *counts.entry(id.partition().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Earliest and latest raw `observed_at` values among records that have one,
    /// in output order.
    pub fn observed_range(&self) -> Option<(String, String)> {
        let mut stamped: Vec<&Record> = self
            .records
            .values()
            .filter(|r| r.observed_key() != ObservedAt::Missing)
            .collect();
        if stamped.is_empty() {
            return None;
        }
        stamped.sort_by(|a, b| cmp_newest_first(a, b));
        let latest = stamped.first()?.observed_at()?.to_string();
        let earliest = stamped.last()?.observed_at()?.to_string();
        Some((earliest, latest))
    }

    /// Consume the store into the persisted order.
    pub fn into_sorted(self) -> Vec<Record> {
        let mut out: Vec<Record> = self.records.into_values().collect();
        out.sort_by(cmp_newest_first);
        out
    }
}
