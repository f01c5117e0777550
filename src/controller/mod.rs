//! Controllers own the stores and decide what every response or event means.
//!
//! - [`FeedSessionController`] - paginated home feed for one scope at a time
//! - [`ChatListController`] - the three chat list sections and unread state
//! - [`SyncEngine`] - runs both on one apply queue with the realtime router
//!
//! The two controllers are synchronous state machines: a trigger returns the
//! request to perform, and the caller hands the response back later. Each
//! issued request carries an epoch, and a response whose epoch is no longer
//! current is dropped.

mod chats;
mod engine;
mod feed;

pub use chats::{
    BulkChats, BulkOutcome, BulkRequest, ChatListController, ChatListState, Section,
};
pub use engine::{BackgroundTask, MutationScope, SyncEngine, SyncEvent, SyncNotice};
pub use feed::{FeedSessionController, FeedState, PageKind, PageOutcome, PageRequest};
