//! Scripted in-memory backend for driving `SyncEngine` end to end.
#![allow(dead_code)]

use async_trait::async_trait;
use campus_sync::backend::{RealtimeStream, SyncBackend};
use campus_sync::config::EngineSettings;
use campus_sync::model::{Chat, ChatBuckets, FeedScope, MutationRequest, Post, SyncError};
use campus_sync::realtime::RawEvent;
use campus_sync::store::PageWindow;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const VIEWER: &str = "me";

/// How `submit_mutation` behaves.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationMode {
    Accept,
    Reject,
    /// Never answers, like a dead connection.
    Hang,
}

pub struct ScriptedBackend {
    pages: Mutex<HashMap<(FeedScope, usize), Vec<Post>>>,
    page_delays: Mutex<HashMap<FeedScope, Duration>>,
    buckets: Mutex<ChatBuckets>,
    unread: Mutex<HashMap<String, u32>>,
    mutation_mode: Mutex<MutationMode>,
    submitted: Mutex<Vec<MutationRequest>>,
    membership_calls: AtomicUsize,
    realtime_tx: mpsc::UnboundedSender<Result<RawEvent, SyncError>>,
    realtime_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RawEvent, SyncError>>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (realtime_tx, realtime_rx) = mpsc::unbounded_channel();
        Self {
            pages: Mutex::new(HashMap::new()),
            page_delays: Mutex::new(HashMap::new()),
            buckets: Mutex::new(ChatBuckets::default()),
            unread: Mutex::new(HashMap::new()),
            mutation_mode: Mutex::new(MutationMode::Accept),
            submitted: Mutex::new(Vec::new()),
            membership_calls: AtomicUsize::new(0),
            realtime_tx,
            realtime_rx: Mutex::new(Some(realtime_rx)),
        }
    }

    pub fn with_page(self, scope: FeedScope, offset: usize, posts: Vec<Post>) -> Self {
        self.pages.lock().unwrap().insert((scope, offset), posts);
        self
    }

    pub fn with_page_delay(self, scope: FeedScope, delay: Duration) -> Self {
        self.page_delays.lock().unwrap().insert(scope, delay);
        self
    }

    pub fn with_chats(self, buckets: ChatBuckets, unread: &[(&str, u32)]) -> Self {
        *self.buckets.lock().unwrap() = buckets;
        self.set_unread(unread);
        self
    }

    pub fn with_mutation_mode(self, mode: MutationMode) -> Self {
        *self.mutation_mode.lock().unwrap() = mode;
        self
    }

    pub fn set_unread(&self, unread: &[(&str, u32)]) {
        *self.unread.lock().unwrap() = unread
            .iter()
            .map(|(id, n)| (id.to_string(), *n))
            .collect();
    }

    /// Push an envelope onto the realtime stream.
    pub fn push(&self, event: RawEvent) {
        let _ = self.realtime_tx.send(Ok(event));
    }

    pub fn submitted(&self) -> Vec<MutationRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn membership_calls(&self) -> usize {
        self.membership_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncBackend for ScriptedBackend {
    async fn fetch_page(
        &self,
        scope: FeedScope,
        window: PageWindow,
    ) -> Result<Vec<Post>, SyncError> {
        let delay = self.page_delays.lock().unwrap().get(&scope).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let page = self
            .pages
            .lock()
            .unwrap()
            .get(&(scope, window.offset))
            .cloned()
            .unwrap_or_default();
        Ok(page.into_iter().take(window.limit).collect())
    }

    async fn initialize_membership(&self, _user_id: &str) -> Result<(), SyncError> {
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_bulk_chats(&self, _user_id: &str) -> Result<ChatBuckets, SyncError> {
        Ok(self.buckets.lock().unwrap().clone())
    }

    async fn fetch_unread_counts(
        &self,
        _user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, u32>, SyncError> {
        let unread = self.unread.lock().unwrap();
        Ok(chat_ids
            .iter()
            .filter_map(|id| unread.get(id).map(|n| (id.clone(), *n)))
            .collect())
    }

    async fn subscribe_realtime(&self) -> Result<RealtimeStream, SyncError> {
        let rx = self
            .realtime_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SyncError::Network("already subscribed".into()))?;
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn submit_mutation(&self, request: &MutationRequest) -> Result<(), SyncError> {
        self.submitted.lock().unwrap().push(request.clone());
        let mode = self.mutation_mode.lock().unwrap().clone();
        match mode {
            MutationMode::Accept => Ok(()),
            MutationMode::Reject => Err(SyncError::Rejected(format!(
                "{} refused",
                request.target_id
            ))),
            MutationMode::Hang => std::future::pending().await,
        }
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings::new(VIEWER)
}

pub fn post(id: &str, scope: &str, minute: u32, likes: u32) -> Post {
    serde_json::from_value(json!({
        "id": id,
        "created_at": format!("2024-03-01T10:{:02}:00Z", minute),
        "scope": scope,
        "stage": 2,
        "like_count": likes,
        "liked_by_viewer": false,
        "body": format!("post {}", id)
    }))
    .unwrap()
}

pub fn chat(id: &str, minute: u32) -> Chat {
    serde_json::from_value(json!({
        "id": id,
        "last_message_at": format!("2024-03-01T09:{:02}:00Z", minute),
        "member_ids": [VIEWER, "friend"]
    }))
    .unwrap()
}

pub fn message_event(event_id: &str, chat_id: &str, sender: &str) -> RawEvent {
    RawEvent::new(
        "messages",
        "create",
        json!({
            "chat_id": chat_id,
            "sender_id": sender,
            "sent_at": "2024-03-01T11:00:00Z",
            "body": "see you at the lab"
        }),
    )
    .with_id(event_id)
}

pub fn ids(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|p| p.id.as_str()).collect()
}
