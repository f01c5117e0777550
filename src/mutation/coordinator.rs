use crate::model::{MutationKind, SyncError};
use crate::store::Patch;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of a tracked mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Pending,
    Confirmed,
    Failed,
}

/// A locally applied mutation awaiting server acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingMutation<T> {
    pub ticket: u64,
    pub target_id: String,
    pub kind: MutationKind,
    pub applied_locally: bool,
    pub resolution: Resolution,
    pub previous_value: T,
    pub started_at: Instant,
}

/// Tracks optimistic mutations and rolls them back on failure or timeout.
///
/// At most one unresolved mutation per target: a like followed by an unlike
/// before the first settles would otherwise roll back to the wrong snapshot.
#[derive(Debug)]
pub struct OptimisticMutationCoordinator<T> {
    pending: HashMap<String, PendingMutation<T>>,
    timeout: Duration,
    next_ticket: u64,
}

impl<T: Clone> OptimisticMutationCoordinator<T> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            next_ticket: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply `apply` to the target immediately and start tracking it.
    ///
    /// Returns the ticket identifying this attempt. Fails synchronously with
    /// `NotFound` when the target is not in `store`, and with
    /// `MutationPending` when the target already has an unresolved mutation.
    pub fn begin<S: Patch<T>>(
        &mut self,
        store: &mut S,
        target_id: &str,
        kind: MutationKind,
        apply: impl FnOnce(&T) -> T,
    ) -> Result<u64, SyncError> {
        if self.pending.contains_key(target_id) {
            return Err(SyncError::MutationPending(target_id.to_string()));
        }
        let previous_value = store
            .patch_value(target_id, apply)
            .ok_or_else(|| SyncError::NotFound(target_id.to_string()))?;

        self.next_ticket = self.next_ticket.wrapping_add(1);
        let ticket = self.next_ticket;
        self.pending.insert(
            target_id.to_string(),
            PendingMutation {
                ticket,
                target_id: target_id.to_string(),
                kind,
                applied_locally: true,
                resolution: Resolution::Pending,
                previous_value,
                started_at: Instant::now(),
            },
        );
        tracing::debug!(target_id, %kind, ticket, "Optimistic mutation applied");
        Ok(ticket)
    }

    /// Stop tracking a mutation the server acknowledged. The store is left as is.
    pub fn confirm(&mut self, target_id: &str, kind: MutationKind) -> Option<PendingMutation<T>> {
        let entry = self.take_matching(target_id, kind)?;
        tracing::debug!(target_id, %kind, ticket = entry.ticket, "Optimistic mutation confirmed");
        Some(PendingMutation {
            resolution: Resolution::Confirmed,
            ..entry
        })
    }

    /// Roll the target back to its pre-mutation value and stop tracking it.
    pub fn fail<S: Patch<T>>(
        &mut self,
        store: &mut S,
        target_id: &str,
        kind: MutationKind,
    ) -> Option<PendingMutation<T>> {
        let entry = self.take_matching(target_id, kind)?;
        Some(Self::roll_back(store, entry))
    }

    /// Auto-fail every mutation older than the timeout.
    pub fn expire_overdue<S: Patch<T>>(
        &mut self,
        store: &mut S,
        now: Instant,
    ) -> Vec<PendingMutation<T>> {
        let overdue: Vec<String> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.started_at) >= self.timeout)
            .map(|p| p.target_id.clone())
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|entry| {
                tracing::warn!(
                    target_id = %entry.target_id,
                    kind = %entry.kind,
                    ticket = entry.ticket,
                    "Optimistic mutation timed out"
                );
                Self::roll_back(store, entry)
            })
            .collect()
    }

    /// Earliest instant at which some pending mutation times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.started_at + self.timeout)
            .min()
    }

    pub fn get(&self, target_id: &str) -> Option<&PendingMutation<T>> {
        self.pending.get(target_id)
    }

    /// Ticket of the unresolved mutation on `target_id`, if any.
    pub fn ticket_of(&self, target_id: &str) -> Option<u64> {
        self.pending.get(target_id).map(|p| p.ticket)
    }

    pub fn is_pending(&self, target_id: &str) -> bool {
        self.pending.contains_key(target_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget all pending mutations without touching any store.
    ///
    /// Used when the store is discarded or overwritten by server state. Tickets
    /// keep counting so late acknowledgements for forgotten attempts can never
    /// match new ones.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                count = self.pending.len(),
                "Discarding pending mutations"
            );
        }
        self.pending.clear();
    }

    fn take_matching(&mut self, target_id: &str, kind: MutationKind) -> Option<PendingMutation<T>> {
        match self.pending.get(target_id) {
            Some(entry) if entry.kind == kind => self.pending.remove(target_id),
            _ => None,
        }
    }

    fn roll_back<S: Patch<T>>(store: &mut S, entry: PendingMutation<T>) -> PendingMutation<T> {
        if !store.restore(&entry.target_id, entry.previous_value.clone()) {
            tracing::debug!(
                target_id = %entry.target_id,
                "Rollback target no longer present, nothing to restore"
            );
        } else {
            tracing::warn!(
                target_id = %entry.target_id,
                kind = %entry.kind,
                "Optimistic mutation rolled back"
            );
        }
        PendingMutation {
            resolution: Resolution::Failed,
            ..entry
        }
    }
}

impl<T: Clone> Default for OptimisticMutationCoordinator<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}
