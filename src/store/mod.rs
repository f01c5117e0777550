//! In-memory state containers owned by the controllers.
//!
//! - [`EntityStore`] - uniquely keyed records kept sorted by activity time
//! - [`PaginationCursor`] - offset/limit paging with an exhausted flag
//! - [`UnreadTracker`] - per-conversation unread counters
//!
//! None of these types lock or suspend. They are mutated only from the
//! owning controller's single timeline.

mod cursor;
mod entity;
mod unread;

pub use cursor::{PageWindow, PaginationCursor};
pub use entity::{EntityStore, UpsertMode, UpsertOutcome};
pub use unread::UnreadTracker;

use crate::model::Record;

/// Something an optimistic mutation can be applied to and rolled back on.
///
/// `patch_value` returns the value before the change, or `None` when the
/// target does not exist (in which case `mutator` is not called).
pub trait Patch<T> {
    fn patch_value(&mut self, id: &str, mutator: impl FnOnce(&T) -> T) -> Option<T>;

    /// Put a rolled-back value in place. Returns false when the target is gone.
    fn restore(&mut self, id: &str, previous: T) -> bool {
        self.patch_value(id, |_| previous).is_some()
    }
}

impl<T: Record> Patch<T> for EntityStore<T> {
    fn patch_value(&mut self, id: &str, mutator: impl FnOnce(&T) -> T) -> Option<T> {
        self.patch(id, mutator)
    }
}

/// Only tracked conversations are patchable, so a count dropped by a removal
/// or a reconciliation is never brought back by a rollback.
impl Patch<u32> for UnreadTracker {
    fn patch_value(&mut self, id: &str, mutator: impl FnOnce(&u32) -> u32) -> Option<u32> {
        if !self.contains(id) {
            return None;
        }
        let previous = self.get(id);
        self.set(id, mutator(&previous));
        Some(previous)
    }

    /// Undo a read by adding back the count it cleared, keeping messages that
    /// arrived since.
    fn restore(&mut self, id: &str, previous: u32) -> bool {
        if !self.contains(id) {
            return false;
        }
        let current = self.get(id);
        self.set(id, previous.saturating_add(current));
        true
    }
}
