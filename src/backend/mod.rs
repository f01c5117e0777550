//! External collaborators the engine talks to.
//!
//! [`SyncBackend`] is the seam between the synchronous controllers and the
//! network. The engine only ever holds an `Arc<dyn SyncBackend>`, so tests
//! drive it with a scripted in-memory backend and the binary plugs in
//! [`HttpBackend`].

mod http;

pub use http::HttpBackend;

use crate::model::{ChatBuckets, FeedScope, MutationRequest, Post, SyncError};
use crate::realtime::RawEvent;
use crate::store::PageWindow;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// Stream of realtime envelopes. Transport failures arrive as `Err` items;
/// the stream ending means the subscription closed.
pub type RealtimeStream = Pin<Box<dyn Stream<Item = Result<RawEvent, SyncError>> + Send>>;

#[async_trait::async_trait]
pub trait SyncBackend: Send + Sync {
    /// One page of posts for a scope, newest first.
    async fn fetch_page(&self, scope: FeedScope, window: PageWindow)
        -> Result<Vec<Post>, SyncError>;

    /// One-time group membership setup for a user. Idempotent server-side.
    async fn initialize_membership(&self, user_id: &str) -> Result<(), SyncError>;

    /// The user's chats, already split into the three sections.
    async fn fetch_bulk_chats(&self, user_id: &str) -> Result<ChatBuckets, SyncError>;

    /// Server-side unread counts for the given chats.
    async fn fetch_unread_counts(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, u32>, SyncError>;

    async fn subscribe_realtime(&self) -> Result<RealtimeStream, SyncError>;

    /// Submit an optimistic mutation. `Ok` means the server accepted it.
    async fn submit_mutation(&self, request: &MutationRequest) -> Result<(), SyncError>;
}
