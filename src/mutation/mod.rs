//! Optimistic mutations: apply locally first, reconcile with the server later.
//!
//! [`OptimisticMutationCoordinator`] snapshots the target before applying a
//! change, removes the entry on confirmation, and restores the snapshot on
//! failure or timeout. It works against any [`Patch`](crate::store::Patch)
//! target, so the same coordinator handles post likes and chat read state.

mod coordinator;

pub use coordinator::{OptimisticMutationCoordinator, PendingMutation, Resolution};
