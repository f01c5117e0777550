use super::MutationKind;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the synchronization engine.
///
/// Variants are `Clone` so they can travel inside queued events and be kept
/// as the controller's `last_error` while also being reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Fetch, subscription or submit failed at the transport level
    /// (DNS, TLS, non-2xx status, request timeout).
    #[error("Network failure: {0}")]
    Network(String),

    /// Mutation target is not present in the local store.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// An optimistic mutation was not acknowledged in time and was rolled back.
    #[error("Mutation timed out: {kind} on {target_id}")]
    Timeout {
        target_id: String,
        kind: MutationKind,
    },

    /// A realtime payload could not be classified.
    #[error("Malformed realtime event: {0}")]
    MalformedEvent(String),

    /// The target already has an unresolved optimistic mutation.
    #[error("A mutation is already pending for {0}")]
    MutationPending(String),

    /// The server answered but refused the mutation.
    #[error("Mutation rejected: {0}")]
    Rejected(String),
}

impl SyncError {
    /// Whether the UI should offer a retry affordance for this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout { .. })
    }
}
