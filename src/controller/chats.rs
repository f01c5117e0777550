//! Sectioned chat list: default groups, custom groups and private chats.
//!
//! Populated once by a bulk fetch on activation and thereafter kept current
//! by realtime events. A manual refresh re-runs the bulk fetch and replaces
//! the unread counts with the server's values.

use crate::model::{
    Chat, ChatBuckets, ChatCategory, MessagePreview, MutationKind, MutationRequest, NewMessage,
    Record, SyncError,
};
use crate::mutation::{OptimisticMutationCoordinator, PendingMutation};
use crate::realtime::DropReason;
use crate::store::{EntityStore, UnreadTracker, UpsertMode};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatListState {
    Inactive,
    Loading,
    Ready,
}

/// A bulk fetch the engine should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRequest {
    pub epoch: u64,
    pub user_id: String,
    /// Run the one-time group membership initialization first.
    pub initialize_membership: bool,
}

/// Everything a bulk fetch returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkChats {
    pub buckets: ChatBuckets,
    pub unread: HashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Applied { chats: usize },
    Stale,
    Failed(SyncError),
}

/// One rendered section of the chat list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section<'a> {
    pub category: ChatCategory,
    pub title: &'static str,
    pub records: &'a [Chat],
}

#[derive(Debug)]
pub struct ChatListController {
    viewer_id: String,
    default_groups: EntityStore<Chat>,
    custom_groups: EntityStore<Chat>,
    private_chats: EntityStore<Chat>,
    unread: UnreadTracker,
    reads: OptimisticMutationCoordinator<u32>,
    open_chat: Option<String>,
    state: ChatListState,
    loaded: bool,
    membership_initialized: bool,
    epoch: u64,
    last_error: Option<SyncError>,
}

impl ChatListController {
    pub fn new(viewer_id: &str, mutation_timeout: Duration) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            default_groups: EntityStore::new(),
            custom_groups: EntityStore::new(),
            private_chats: EntityStore::new(),
            unread: UnreadTracker::new(),
            reads: OptimisticMutationCoordinator::new(mutation_timeout),
            open_chat: None,
            state: ChatListState::Inactive,
            loaded: false,
            membership_initialized: false,
            epoch: 0,
            last_error: None,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn state(&self) -> ChatListState {
        self.state
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn open_chat_id(&self) -> Option<&str> {
        self.open_chat.as_deref()
    }

    pub fn store(&self, category: ChatCategory) -> &EntityStore<Chat> {
        match category {
            ChatCategory::DefaultGroup => &self.default_groups,
            ChatCategory::CustomGroup => &self.custom_groups,
            ChatCategory::Private => &self.private_chats,
        }
    }

    fn store_mut(&mut self, category: ChatCategory) -> &mut EntityStore<Chat> {
        match category {
            ChatCategory::DefaultGroup => &mut self.default_groups,
            ChatCategory::CustomGroup => &mut self.custom_groups,
            ChatCategory::Private => &mut self.private_chats,
        }
    }

    /// Section holding `chat_id`, searched in display order.
    pub fn category_of(&self, chat_id: &str) -> Option<ChatCategory> {
        ChatCategory::ALL
            .into_iter()
            .find(|c| self.store(*c).contains(chat_id))
    }

    pub fn get(&self, chat_id: &str) -> Option<&Chat> {
        self.category_of(chat_id)
            .and_then(|c| self.store(c).get(chat_id))
    }

    /// Non-empty sections in fixed order.
    pub fn sections(&self) -> Vec<Section<'_>> {
        ChatCategory::ALL
            .into_iter()
            .filter_map(|category| {
                let records = self.store(category).records();
                (!records.is_empty()).then_some(Section {
                    category,
                    title: category.title(),
                    records,
                })
            })
            .collect()
    }

    pub fn unread_count(&self, chat_id: &str) -> u32 {
        self.unread.get(chat_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.total()
    }

    // ------------------------------------------------------------------------
    // Bulk fetch
    // ------------------------------------------------------------------------

    /// First activation. Only valid while inactive.
    pub fn activate(&mut self) -> Option<BulkRequest> {
        if self.state != ChatListState::Inactive {
            tracing::debug!(state = ?self.state, "Chat list activate ignored");
            return None;
        }
        Some(self.issue())
    }

    /// Manual refresh; the sole path that corrects unread drift.
    pub fn refresh(&mut self) -> Option<BulkRequest> {
        match self.state {
            ChatListState::Loading => {
                tracing::debug!("Chat list refresh ignored, already loading");
                None
            }
            ChatListState::Inactive | ChatListState::Ready => Some(self.issue()),
        }
    }

    fn issue(&mut self) -> BulkRequest {
        self.epoch = self.epoch.wrapping_add(1);
        self.state = ChatListState::Loading;
        BulkRequest {
            epoch: self.epoch,
            user_id: self.viewer_id.clone(),
            initialize_membership: !self.membership_initialized,
        }
    }

    pub fn apply_bulk(
        &mut self,
        request: &BulkRequest,
        result: Result<BulkChats, SyncError>,
    ) -> BulkOutcome {
        if request.epoch != self.epoch {
            tracing::debug!(
                expected = self.epoch,
                got = request.epoch,
                "Ignoring stale chat list response"
            );
            return BulkOutcome::Stale;
        }

        match result {
            Ok(BulkChats { buckets, unread }) => {
                let chats = buckets.default_groups.len()
                    + buckets.custom_groups.len()
                    + buckets.private_chats.len();
                self.default_groups
                    .upsert_many(buckets.default_groups, UpsertMode::Replace);
                self.custom_groups
                    .upsert_many(buckets.custom_groups, UpsertMode::Replace);
                self.private_chats
                    .upsert_many(buckets.private_chats, UpsertMode::Replace);
                self.unread.bulk_reconcile(unread);
                // Server counts win; a later ack or failure of an older read
                // must not write over them.
                self.reads.clear();
                self.membership_initialized = true;
                self.loaded = true;
                self.state = ChatListState::Ready;
                self.last_error = None;
                tracing::info!(
                    chats,
                    unread = self.unread.total(),
                    "Chat list applied"
                );
                BulkOutcome::Applied { chats }
            }
            Err(e) => {
                self.state = if self.loaded {
                    ChatListState::Ready
                } else {
                    ChatListState::Inactive
                };
                tracing::warn!(error = %e, "Chat list fetch failed");
                self.last_error = Some(e.clone());
                BulkOutcome::Failed(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Realtime
    // ------------------------------------------------------------------------

    /// Merge a chat update into the first section that already holds it.
    ///
    /// Chats not yet known locally are dropped; they appear on the next
    /// bulk refresh. An update whose member list no longer includes the
    /// viewer removes the chat.
    pub fn apply_chat_update(&mut self, chat: Chat) -> Result<ChatCategory, DropReason> {
        let category = self
            .category_of(chat.id())
            .ok_or(DropReason::UnknownChat)?;
        if chat.member_ids.is_some() && !chat.has_member(&self.viewer_id) {
            tracing::info!(chat_id = %chat.id, "Viewer left chat, removing it");
            return self.remove_chat(&chat.id);
        }
        self.store_mut(category).upsert_one(chat);
        Ok(category)
    }

    pub fn remove_chat(&mut self, chat_id: &str) -> Result<ChatCategory, DropReason> {
        let category = self.category_of(chat_id).ok_or(DropReason::UnknownChat)?;
        self.store_mut(category).remove(chat_id);
        self.unread.remove(chat_id);
        if self.open_chat.as_deref() == Some(chat_id) {
            self.open_chat = None;
        }
        Ok(category)
    }

    /// Bump the chat's activity and, if the message is from someone else and
    /// the chat is not open, its unread count.
    ///
    /// Returns whether the unread count was incremented.
    pub fn apply_new_message(&mut self, message: &NewMessage) -> Result<bool, DropReason> {
        let category = self
            .category_of(&message.chat_id)
            .ok_or(DropReason::UnknownChat)?;

        let preview = MessagePreview {
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            sent_at: message.sent_at,
        };
        self.store_mut(category).patch(&message.chat_id, |chat| Chat {
            last_message_at: chat.last_message_at.max(message.sent_at),
            last_message: Some(preview),
            ..chat.clone()
        });

        let from_viewer = message.sender_id == self.viewer_id;
        let chat_open = self.open_chat.as_deref() == Some(message.chat_id.as_str());
        if from_viewer || chat_open {
            return Ok(false);
        }
        let count = self.unread.increment(&message.chat_id);
        tracing::debug!(chat_id = %message.chat_id, count, "Unread count incremented");
        Ok(true)
    }

    /// The viewer read this chat elsewhere (no matching pending mutation).
    pub fn apply_own_receipt(&mut self, chat_id: &str) -> Result<(), DropReason> {
        if self.category_of(chat_id).is_none() {
            return Err(DropReason::UnknownChat);
        }
        if self.unread.get(chat_id) == 0 {
            return Err(DropReason::AlreadyApplied);
        }
        self.unread.reset(chat_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Open conversation and read state
    // ------------------------------------------------------------------------

    /// Mark a chat as the open conversation and read it.
    pub fn open_chat(
        &mut self,
        chat_id: &str,
    ) -> Result<Option<(u64, MutationRequest)>, SyncError> {
        if self.category_of(chat_id).is_none() {
            return Err(SyncError::NotFound(chat_id.to_string()));
        }
        self.open_chat = Some(chat_id.to_string());
        self.mark_read(chat_id)
    }

    pub fn close_chat(&mut self) {
        self.open_chat = None;
    }

    /// Reset the unread count locally and return the read receipt to submit.
    ///
    /// Returns `Ok(None)` when there is nothing to send: the chat is already
    /// read, or a receipt for it is still pending.
    pub fn mark_read(
        &mut self,
        chat_id: &str,
    ) -> Result<Option<(u64, MutationRequest)>, SyncError> {
        if self.category_of(chat_id).is_none() {
            return Err(SyncError::NotFound(chat_id.to_string()));
        }
        if self.unread.get(chat_id) == 0 {
            return Ok(None);
        }
        if self.reads.is_pending(chat_id) {
            self.unread.reset(chat_id);
            return Ok(None);
        }
        let ticket = self
            .reads
            .begin(&mut self.unread, chat_id, MutationKind::MarkRead, |_| 0)?;
        Ok(Some((
            ticket,
            MutationRequest {
                kind: MutationKind::MarkRead,
                target_id: chat_id.to_string(),
                user_id: self.viewer_id.clone(),
                value: json!({ "read": true }),
            },
        )))
    }

    /// Server confirmed the viewer's read receipt.
    pub fn confirm_read(&mut self, chat_id: &str) -> bool {
        self.reads.confirm(chat_id, MutationKind::MarkRead).is_some()
    }

    pub fn has_pending_read(&self, chat_id: &str) -> bool {
        self.reads.is_pending(chat_id)
    }

    /// Settle a submitted read receipt identified by its ticket.
    pub fn settle_read(
        &mut self,
        chat_id: &str,
        ticket: u64,
        result: &Result<(), SyncError>,
    ) -> Option<PendingMutation<u32>> {
        if self.reads.ticket_of(chat_id) != Some(ticket) {
            return None;
        }
        match result {
            Ok(()) => self.reads.confirm(chat_id, MutationKind::MarkRead),
            Err(_) => self
                .reads
                .fail(&mut self.unread, chat_id, MutationKind::MarkRead),
        }
    }

    pub fn expire_overdue(&mut self, now: Instant) -> Vec<PendingMutation<u32>> {
        self.reads.expire_overdue(&mut self.unread, now)
    }

    pub fn next_mutation_deadline(&self) -> Option<Instant> {
        self.reads.next_deadline()
    }
}
