use super::event::{classify, Collection, LikeEvent, RawEvent, ReadReceipt, RealtimeEvent};
use crate::controller::{ChatListController, FeedSessionController};
use crate::model::{MutationKind, SyncError};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Why a well-formed event changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Event id already seen.
    Duplicate,
    /// Post belongs to a different feed scope.
    ScopeMismatch,
    /// No feed scope is loaded.
    NoActiveScope,
    /// Post is not in the active store.
    UnknownPost,
    /// Chat is not in any chat list section.
    UnknownChat,
    /// Local state already reflects the event.
    AlreadyApplied,
    /// Another user's read receipt.
    ForeignReceipt,
    /// The viewer's own echo that matches no pending mutation while another
    /// mutation on the same target is in flight.
    StaleAcknowledgement,
}

/// Result of routing one raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// State changed.
    Applied(Collection),
    /// The event acknowledged a pending optimistic mutation.
    Reconciled { target_id: String, kind: MutationKind },
    Dropped(DropReason),
    Malformed(SyncError),
}

/// Running totals, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub received: u64,
    pub applied: u64,
    pub reconciled: u64,
    pub dropped: u64,
    pub malformed: u64,
}

/// Classifies realtime events and applies each to the controller that owns it.
///
/// The router holds no entity state of its own besides a bounded window of
/// recently seen event ids, used to drop redeliveries.
#[derive(Debug)]
pub struct RealtimeEventRouter {
    viewer_id: String,
    recent: LruCache<String, ()>,
    stats: RouterStats,
}

impl RealtimeEventRouter {
    pub const DEFAULT_RECENT_CAPACITY: usize = 256;

    pub fn new(viewer_id: &str, recent_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(recent_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            viewer_id: viewer_id.to_string(),
            recent: LruCache::new(capacity),
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Forget seen event ids, e.g. after logout.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.stats = RouterStats::default();
    }

    pub fn route(
        &mut self,
        raw: &RawEvent,
        feed: &mut FeedSessionController,
        chats: &mut ChatListController,
    ) -> DispatchOutcome {
        self.stats.received += 1;

        if let Some(event_id) = &raw.event_id {
            if self.recent.put(event_id.clone(), ()).is_some() {
                tracing::debug!(event_id = %event_id, "Duplicate realtime event dropped");
                return self.tally(DispatchOutcome::Dropped(DropReason::Duplicate));
            }
        }

        let event = match classify(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    collection = %raw.collection,
                    operation = %raw.operation,
                    error = %e,
                    "Malformed realtime event"
                );
                return self.tally(DispatchOutcome::Malformed(e));
            }
        };

        let collection = event.collection();
        let outcome = match event {
            RealtimeEvent::PostUpserted(post) => applied(collection, feed.apply_remote_post(post)),
            RealtimeEvent::PostDeleted(post) => {
                applied(collection, feed.apply_remote_delete(&post))
            }
            RealtimeEvent::Like(like) => self.route_like(&like, feed),
            RealtimeEvent::ChatUpdated(chat) => {
                applied(collection, chats.apply_chat_update(chat).map(|_| ()))
            }
            RealtimeEvent::ChatDeleted(chat) => {
                applied(collection, chats.remove_chat(&chat.id).map(|_| ()))
            }
            RealtimeEvent::MessageCreated(message) => {
                applied(collection, chats.apply_new_message(&message).map(|_| ()))
            }
            RealtimeEvent::ReadReceipt(receipt) => self.route_receipt(&receipt, chats),
        };

        if let DispatchOutcome::Dropped(reason) = &outcome {
            tracing::debug!(?collection, ?reason, "Realtime event dropped");
        }
        self.tally(outcome)
    }

    fn route_like(&self, like: &LikeEvent, feed: &mut FeedSessionController) -> DispatchOutcome {
        if like.user_id != self.viewer_id {
            return applied(Collection::Like, feed.apply_foreign_like(like));
        }

        let kind = if like.liked {
            MutationKind::Like
        } else {
            MutationKind::Unlike
        };
        if feed.confirm_mutation(&like.post_id, kind) {
            return DispatchOutcome::Reconciled {
                target_id: like.post_id.clone(),
                kind,
            };
        }
        if feed.has_pending_mutation(&like.post_id) {
            return DispatchOutcome::Dropped(DropReason::StaleAcknowledgement);
        }
        applied(Collection::Like, feed.apply_own_like(like))
    }

    fn route_receipt(
        &self,
        receipt: &ReadReceipt,
        chats: &mut ChatListController,
    ) -> DispatchOutcome {
        if receipt.user_id != self.viewer_id {
            return DispatchOutcome::Dropped(DropReason::ForeignReceipt);
        }
        if chats.confirm_read(&receipt.chat_id) {
            return DispatchOutcome::Reconciled {
                target_id: receipt.chat_id.clone(),
                kind: MutationKind::MarkRead,
            };
        }
        applied(
            Collection::ReadReceipt,
            chats.apply_own_receipt(&receipt.chat_id),
        )
    }

    fn tally(&mut self, outcome: DispatchOutcome) -> DispatchOutcome {
        match &outcome {
            DispatchOutcome::Applied(_) => self.stats.applied += 1,
            DispatchOutcome::Reconciled { .. } => self.stats.reconciled += 1,
            DispatchOutcome::Dropped(_) => self.stats.dropped += 1,
            DispatchOutcome::Malformed(_) => self.stats.malformed += 1,
        }
        outcome
    }
}

fn applied(collection: Collection, result: Result<(), DropReason>) -> DispatchOutcome {
    match result {
        Ok(()) => DispatchOutcome::Applied(collection),
        Err(reason) => DispatchOutcome::Dropped(reason),
    }
}
