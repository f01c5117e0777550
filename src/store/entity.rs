use crate::model::Record;
use std::collections::HashSet;

/// How a batch of fetched records is combined with what is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Page-1 or refresh: discard prior content first.
    Replace,
    /// Load-more: add only ids not already present.
    Append,
}

/// What [`EntityStore::upsert_one`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Ordered collection of uniquely keyed records.
///
/// After every mutation the records are sorted by `last_activity_at`
/// descending, ties broken by id ascending, and no id appears twice.
#[derive(Debug, Clone)]
pub struct EntityStore<T> {
    records: Vec<T>,
}

impl<T> Default for EntityStore<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Record> EntityStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id())
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Merge a fetched batch.
    ///
    /// `Replace` drops prior content; duplicate ids inside the batch merge into
    /// the first occurrence. `Append` skips every id already held (including
    /// records carrying optimistic edits) and keeps the first occurrence of a
    /// duplicate within the batch.
    pub fn upsert_many(&mut self, incoming: Vec<T>, mode: UpsertMode) {
        match mode {
            UpsertMode::Replace => {
                self.records.clear();
                for record in incoming {
                    match self.position(record.id()) {
                        Some(idx) => self.records[idx].merge_from(record),
                        None => self.records.push(record),
                    }
                }
            }
            UpsertMode::Append => {
                let mut seen: HashSet<String> =
                    self.records.iter().map(|r| r.id().to_string()).collect();
                for record in incoming {
                    if seen.insert(record.id().to_string()) {
                        self.records.push(record);
                    }
                }
            }
        }
        self.sort();
    }

    /// Insert a new record or shallow-merge into the existing one with the same id.
    pub fn upsert_one(&mut self, record: T) -> UpsertOutcome {
        let outcome = match self.position(record.id()) {
            Some(idx) => {
                self.records[idx].merge_from(record);
                UpsertOutcome::Updated
            }
            None => {
                self.records.push(record);
                UpsertOutcome::Inserted
            }
        };
        self.sort();
        outcome
    }

    /// Remove by id. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        let idx = self.position(id)?;
        Some(self.records.remove(idx))
    }

    /// Replace a record with `mutator(current)` and return the previous value.
    ///
    /// Returns `None` without calling `mutator` when the id is absent.
    pub fn patch(&mut self, id: &str, mutator: impl FnOnce(&T) -> T) -> Option<T> {
        let idx = self.position(id)?;
        let next = mutator(&self.records[idx]);
        let previous = std::mem::replace(&mut self.records[idx], next);
        self.sort();
        Some(previous)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            b.last_activity_at()
                .cmp(&a.last_activity_at())
                .then_with(|| a.id().cmp(b.id()))
        });
    }
}
