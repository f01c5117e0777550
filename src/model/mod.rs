//! Records, scopes and errors shared by every layer of the engine.
//!
//! - [`Post`] and [`Chat`] are the two record kinds kept in stores. Both
//!   implement [`Record`], which exposes the id, the activity timestamp used
//!   for ordering, and a shallow merge for realtime updates.
//! - [`FeedScope`] partitions the home feed by [`FeedKind`] and
//!   [`StageFilter`]; [`ChatCategory`] partitions the chat list.
//! - [`SyncError`] is the error taxonomy reported to the UI.

mod error;
mod types;

pub use error::SyncError;
pub use types::{
    Chat, ChatBuckets, ChatCategory, FeedKind, FeedScope, MessagePreview, MutationKind,
    MutationRequest, NewMessage, Post, Record, StageFilter,
};
