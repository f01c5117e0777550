use crate::model::{Chat, FeedKind, NewMessage, Post, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope delivered by the realtime service, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Delivery id, used to suppress redelivered events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub collection: String,
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(collection: &str, operation: &str, payload: Value) -> Self {
        Self {
            event_id: None,
            collection: collection.to_string(),
            operation: operation.to_string(),
            payload,
        }
    }

    pub fn with_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }
}

/// Target collection of a realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Post,
    Chat,
    Message,
    Like,
    ReadReceipt,
}

impl Collection {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "post" | "posts" => Some(Collection::Post),
            "chat" | "chats" => Some(Collection::Chat),
            "message" | "messages" => Some(Collection::Message),
            "like" | "likes" => Some(Collection::Like),
            "read_receipt" | "read_receipts" | "readreceipt" | "readreceipts" => {
                Some(Collection::ReadReceipt)
            }
            _ => None,
        }
    }
}

/// Kind of change a realtime event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "create" | "insert" => Some(Operation::Create),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Identity (and optional scope hints) of a deleted post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostRef {
    pub id: String,
    #[serde(default)]
    pub scope: Option<FeedKind>,
    #[serde(default)]
    pub stage: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatRef {
    pub id: String,
}

/// A like or unlike by some user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LikeEvent {
    pub post_id: String,
    pub user_id: String,
    /// Filled from the operation: create = like, delete = unlike.
    #[serde(skip)]
    pub liked: bool,
    /// Server-side total after this change, when the payload carries it.
    #[serde(default)]
    pub like_count: Option<u32>,
}

/// A read receipt for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadReceipt {
    pub chat_id: String,
    pub user_id: String,
}

/// A classified realtime event, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    PostUpserted(Post),
    PostDeleted(PostRef),
    ChatUpdated(Chat),
    ChatDeleted(ChatRef),
    MessageCreated(NewMessage),
    Like(LikeEvent),
    ReadReceipt(ReadReceipt),
}

impl RealtimeEvent {
    pub fn collection(&self) -> Collection {
        match self {
            RealtimeEvent::PostUpserted(_) | RealtimeEvent::PostDeleted(_) => Collection::Post,
            RealtimeEvent::ChatUpdated(_) | RealtimeEvent::ChatDeleted(_) => Collection::Chat,
            RealtimeEvent::MessageCreated(_) => Collection::Message,
            RealtimeEvent::Like(_) => Collection::Like,
            RealtimeEvent::ReadReceipt(_) => Collection::ReadReceipt,
        }
    }
}

/// Classify a raw envelope by collection, operation and payload shape.
///
/// Anything that cannot be classified yields [`SyncError::MalformedEvent`].
pub fn classify(raw: &RawEvent) -> Result<RealtimeEvent, SyncError> {
    let collection = Collection::parse(&raw.collection).ok_or_else(|| {
        SyncError::MalformedEvent(format!("unknown collection '{}'", raw.collection))
    })?;
    let operation = Operation::parse(&raw.operation).ok_or_else(|| {
        SyncError::MalformedEvent(format!("unknown operation '{}'", raw.operation))
    })?;

    match (collection, operation) {
        (Collection::Post, Operation::Create | Operation::Update) => {
            payload(raw).map(RealtimeEvent::PostUpserted)
        }
        (Collection::Post, Operation::Delete) => payload(raw).map(RealtimeEvent::PostDeleted),
        (Collection::Chat, Operation::Create | Operation::Update) => {
            payload(raw).map(RealtimeEvent::ChatUpdated)
        }
        (Collection::Chat, Operation::Delete) => payload(raw).map(RealtimeEvent::ChatDeleted),
        (Collection::Message, Operation::Create) => {
            payload(raw).map(RealtimeEvent::MessageCreated)
        }
        (Collection::Like, Operation::Create | Operation::Delete) => {
            let mut like: LikeEvent = payload(raw)?;
            like.liked = operation == Operation::Create;
            Ok(RealtimeEvent::Like(like))
        }
        (Collection::ReadReceipt, Operation::Create | Operation::Update) => {
            payload(raw).map(RealtimeEvent::ReadReceipt)
        }
        (collection, operation) => Err(SyncError::MalformedEvent(format!(
            "unsupported {:?} on {:?}",
            operation, collection
        ))),
    }
}

fn payload<T: serde::de::DeserializeOwned>(raw: &RawEvent) -> Result<T, SyncError> {
    T::deserialize(&raw.payload).map_err(|e| {
        SyncError::MalformedEvent(format!(
            "{} {} payload: {}",
            raw.collection, raw.operation, e
        ))
    })
}
