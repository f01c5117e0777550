use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Record Trait
// ============================================================================

/// A uniquely keyed record held by an [`EntityStore`](crate::store::EntityStore).
///
/// The engine only interprets the id, the activity timestamp and (for chats)
/// membership. Everything else is carried as an opaque field map.
pub trait Record: Clone {
    /// Stable unique identifier.
    fn id(&self) -> &str;

    /// Sort key: post creation time or a chat's last message time.
    fn last_activity_at(&self) -> DateTime<Utc>;

    /// Shallow merge of an incoming version of the same record.
    ///
    /// Required fields are overwritten; optional fields and opaque entries are
    /// overwritten only when the incoming value is present and non-null.
    fn merge_from(&mut self, incoming: Self);
}

/// Overwrite `target` keys with every non-null entry of `incoming`.
fn merge_fields(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        if !value.is_null() {
            target.insert(key, value);
        }
    }
}

// ============================================================================
// Feed Scopes
// ============================================================================

/// Which home feed a post belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Posts from the viewer's own department.
    Department,
    /// Posts from the viewer's major and related departments.
    Major,
    /// University-wide posts.
    Public,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Department => "department",
            FeedKind::Major => "major",
            FeedKind::Public => "public",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "department" => Ok(FeedKind::Department),
            "major" => Ok(FeedKind::Major),
            "public" => Ok(FeedKind::Public),
            other => Err(format!(
                "unknown feed '{}' (expected department, major or public)",
                other
            )),
        }
    }
}

/// Stage (study year) sub-filter applied on top of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StageFilter {
    #[default]
    All,
    Stage(u8),
}

impl StageFilter {
    /// A post without a stage only appears under `All`.
    pub fn matches(&self, stage: Option<u8>) -> bool {
        match self {
            StageFilter::All => true,
            StageFilter::Stage(wanted) => stage == Some(*wanted),
        }
    }
}

impl fmt::Display for StageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFilter::All => f.write_str("all"),
            StageFilter::Stage(n) => write!(f, "stage-{}", n),
        }
    }
}

/// A (feed, stage) partition that owns its own store and cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedScope {
    pub kind: FeedKind,
    pub stage: StageFilter,
}

impl FeedScope {
    pub fn new(kind: FeedKind, stage: StageFilter) -> Self {
        Self { kind, stage }
    }

    /// Whether a post belongs to this scope.
    pub fn matches(&self, post: &Post) -> bool {
        post.scope == self.kind && self.stage.matches(post.stage)
    }
}

impl Default for FeedScope {
    fn default() -> Self {
        Self::new(FeedKind::Department, StageFilter::All)
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.stage)
    }
}

// ============================================================================
// Posts
// ============================================================================

/// A feed post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub scope: FeedKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liked_by_viewer: Option<bool>,
    /// Author, body, media and any other business fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Post {
    pub fn likes(&self) -> u32 {
        self.like_count.unwrap_or(0)
    }

    pub fn is_liked(&self) -> bool {
        self.liked_by_viewer.unwrap_or(false)
    }
}

impl Record for Post {
    fn id(&self) -> &str {
        &self.id
    }

    fn last_activity_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn merge_from(&mut self, incoming: Self) {
        self.created_at = incoming.created_at;
        self.scope = incoming.scope;
        if incoming.stage.is_some() {
            self.stage = incoming.stage;
        }
        if incoming.like_count.is_some() {
            self.like_count = incoming.like_count;
        }
        if incoming.liked_by_viewer.is_some() {
            self.liked_by_viewer = incoming.liked_by_viewer;
        }
        merge_fields(&mut self.fields, incoming.fields);
    }
}

// ============================================================================
// Chats
// ============================================================================

/// The three chat list sections, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatCategory {
    DefaultGroup,
    CustomGroup,
    Private,
}

impl ChatCategory {
    /// Fixed section order; also the realtime dispatch order.
    pub const ALL: [ChatCategory; 3] = [
        ChatCategory::DefaultGroup,
        ChatCategory::CustomGroup,
        ChatCategory::Private,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            ChatCategory::DefaultGroup => "Default Groups",
            ChatCategory::CustomGroup => "Custom Groups",
            ChatCategory::Private => "Private Chats",
        }
    }
}

/// Last message shown under a chat's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// A group or private conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub last_message_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Chat {
    /// Unknown membership (not sent by the server) counts as "not a member".
    pub fn has_member(&self, user_id: &str) -> bool {
        self.member_ids
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|id| id == user_id))
    }
}

impl Record for Chat {
    fn id(&self) -> &str {
        &self.id
    }

    fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_message_at
    }

    fn merge_from(&mut self, incoming: Self) {
        self.last_message_at = incoming.last_message_at;
        if incoming.member_ids.is_some() {
            self.member_ids = incoming.member_ids;
        }
        if incoming.last_message.is_some() {
            self.last_message = incoming.last_message;
        }
        merge_fields(&mut self.fields, incoming.fields);
    }
}

/// A message pushed by the realtime service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub chat_id: String,
    pub sender_id: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Result of the bulk chat-list fetch, one list per section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatBuckets {
    #[serde(default)]
    pub default_groups: Vec<Chat>,
    #[serde(default)]
    pub custom_groups: Vec<Chat>,
    #[serde(default)]
    pub private_chats: Vec<Chat>,
}

impl ChatBuckets {
    /// All chat ids across the three sections.
    pub fn chat_ids(&self) -> Vec<String> {
        self.default_groups
            .iter()
            .chain(&self.custom_groups)
            .chain(&self.private_chats)
            .map(|c| c.id.clone())
            .collect()
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Kinds of optimistic mutation the engine can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Like,
    Unlike,
    MarkRead,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Like => "like",
            MutationKind::Unlike => "unlike",
            MutationKind::MarkRead => "mark_read",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation submitted to the backend after being applied locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub kind: MutationKind,
    pub target_id: String,
    pub user_id: String,
    #[serde(default)]
    pub value: Value,
}
