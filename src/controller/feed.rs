//! Home feed state for one active (feed, stage) scope.
//!
//! State machine:
//!
//! ```text
//! Idle -> LoadingFirstPage -> Ready -> LoadingMore -> Ready ...
//!   ^                                                   |
//!   +------------------ scope change -------------------+
//! ```
//!
//! Every issued [`PageRequest`] carries the controller epoch at the time it
//! was issued. The epoch moves forward on every new request and on every
//! scope change, so only the most recently issued request can be applied and
//! late responses for superseded scopes are dropped on arrival.

use crate::model::{FeedScope, MutationKind, MutationRequest, Post, SyncError};
use crate::mutation::{OptimisticMutationCoordinator, PendingMutation};
use crate::realtime::{DropReason, LikeEvent, PostRef};
use crate::store::{EntityStore, PaginationCursor, UpsertMode};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    LoadingFirstPage,
    Ready,
    LoadingMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Page 1 of a fresh activation or a refresh; replaces store content.
    First,
    /// A subsequent page; appended.
    More,
}

/// A page fetch the engine should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub scope: FeedScope,
    pub offset: usize,
    pub limit: usize,
    pub epoch: u64,
    pub kind: PageKind,
}

/// Result of applying a page response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Applied { count: usize, exhausted: bool },
    /// The response belongs to a superseded request and was dropped.
    Stale,
    /// Fetch failed; prior content is untouched.
    Failed(SyncError),
}

/// Store and cursor for the active scope, created on first activation.
#[derive(Debug)]
struct ScopeSession {
    store: EntityStore<Post>,
    cursor: PaginationCursor,
    loaded: bool,
}

/// Owns the home feed for the currently selected scope.
#[derive(Debug)]
pub struct FeedSessionController {
    scope: FeedScope,
    page_size: usize,
    session: Option<ScopeSession>,
    state: FeedState,
    epoch: u64,
    likes: OptimisticMutationCoordinator<Post>,
    last_error: Option<SyncError>,
}

impl FeedSessionController {
    pub fn new(scope: FeedScope, page_size: usize, mutation_timeout: Duration) -> Self {
        Self {
            scope,
            page_size,
            session: None,
            state: FeedState::Idle,
            epoch: 0,
            likes: OptimisticMutationCoordinator::new(mutation_timeout),
            last_error: None,
        }
    }

    pub fn scope(&self) -> FeedScope {
        self.scope
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    /// Posts of the active scope, newest first. Empty while idle.
    pub fn visible_posts(&self) -> &[Post] {
        self.session
            .as_ref()
            .map(|s| s.store.records())
            .unwrap_or(&[])
    }

    pub fn get(&self, post_id: &str) -> Option<&Post> {
        self.session.as_ref()?.store.get(post_id)
    }

    /// True once the active scope has no further pages.
    pub fn is_exhausted(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.cursor.is_exhausted())
    }

    pub fn has_pending_mutation(&self, post_id: &str) -> bool {
        self.likes.is_pending(post_id)
    }

    pub fn pending_mutation(&self, post_id: &str) -> Option<&PendingMutation<Post>> {
        self.likes.get(post_id)
    }

    // ------------------------------------------------------------------------
    // Scope lifecycle
    // ------------------------------------------------------------------------

    /// Switch to another scope.
    ///
    /// Discards the old store, cursor and pending likes, and returns to
    /// `Idle`. Returns false when `scope` is already active.
    pub fn set_scope(&mut self, scope: FeedScope) -> bool {
        if scope == self.scope {
            return false;
        }
        tracing::info!(from = %self.scope, to = %scope, "Feed scope changed");
        self.scope = scope;
        self.discard();
        true
    }

    /// Drop all state for the current scope and return to `Idle`.
    pub fn discard(&mut self) {
        self.session = None;
        self.likes.clear();
        self.state = FeedState::Idle;
        self.last_error = None;
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Start loading page 1 of the current scope. Only valid from `Idle`.
    pub fn activate(&mut self) -> Option<PageRequest> {
        if self.state != FeedState::Idle {
            tracing::debug!(state = ?self.state, scope = %self.scope, "Activate ignored, feed not idle");
            return None;
        }
        let page_size = self.page_size;
        self.session.get_or_insert_with(|| ScopeSession {
            store: EntityStore::new(),
            cursor: PaginationCursor::new(page_size),
            loaded: false,
        });
        Some(self.issue(PageKind::First, FeedState::LoadingFirstPage))
    }

    /// Re-fetch page 1. Content is replaced only when the fetch succeeds.
    ///
    /// Supersedes an in-flight load-more. Ignored while page 1 is already loading.
    pub fn refresh(&mut self) -> Option<PageRequest> {
        match self.state {
            FeedState::Idle => self.activate(),
            FeedState::LoadingFirstPage => {
                tracing::debug!(scope = %self.scope, "Refresh ignored, first page already loading");
                None
            }
            FeedState::Ready | FeedState::LoadingMore => {
                Some(self.issue(PageKind::First, FeedState::LoadingFirstPage))
            }
        }
    }

    /// Request the next page.
    ///
    /// No-op unless `Ready` with pages remaining, so repeated requests while a
    /// page is loading never produce duplicate fetches.
    pub fn request_load_more(&mut self) -> Option<PageRequest> {
        if self.state != FeedState::Ready {
            tracing::debug!(state = ?self.state, "Load more ignored, feed not ready");
            return None;
        }
        if self.is_exhausted() {
            tracing::debug!(scope = %self.scope, "Load more ignored, feed exhausted");
            return None;
        }
        Some(self.issue(PageKind::More, FeedState::LoadingMore))
    }

    fn issue(&mut self, kind: PageKind, state: FeedState) -> PageRequest {
        self.epoch = self.epoch.wrapping_add(1);
        self.state = state;
        let (offset, limit) = match (kind, self.session.as_ref()) {
            (PageKind::More, Some(session)) => {
                let window = session.cursor.next_page();
                (window.offset, window.limit)
            }
            _ => (0, self.effective_page_size()),
        };
        PageRequest {
            scope: self.scope,
            offset,
            limit,
            epoch: self.epoch,
            kind,
        }
    }

    fn effective_page_size(&self) -> usize {
        self.session
            .as_ref()
            .map(|s| s.cursor.page_size())
            .unwrap_or_else(|| PaginationCursor::new(self.page_size).page_size())
    }

    /// Apply the response to a previously issued request.
    pub fn apply_page(
        &mut self,
        request: &PageRequest,
        result: Result<Vec<Post>, SyncError>,
    ) -> PageOutcome {
        if request.epoch != self.epoch || request.scope != self.scope {
            tracing::debug!(
                expected = self.epoch,
                got = request.epoch,
                scope = %request.scope,
                "Ignoring stale page response"
            );
            return PageOutcome::Stale;
        }
        let Some(session) = self.session.as_mut() else {
            return PageOutcome::Stale;
        };

        match result {
            Ok(posts) => {
                let count = posts.len();
                match request.kind {
                    PageKind::First => {
                        session.cursor.reset();
                        session.store.upsert_many(posts, UpsertMode::Replace);
                    }
                    PageKind::More => {
                        session.store.upsert_many(posts, UpsertMode::Append);
                    }
                }
                session.cursor.record_page_result(count);
                session.loaded = true;
                self.state = FeedState::Ready;
                self.last_error = None;
                let exhausted = session.cursor.is_exhausted();
                tracing::info!(
                    scope = %self.scope,
                    kind = ?request.kind,
                    count,
                    total = session.store.len(),
                    exhausted,
                    "Feed page applied"
                );
                PageOutcome::Applied { count, exhausted }
            }
            Err(e) => {
                self.state = if session.loaded {
                    FeedState::Ready
                } else {
                    FeedState::Idle
                };
                tracing::warn!(scope = %self.scope, kind = ?request.kind, error = %e, "Feed page fetch failed");
                self.last_error = Some(e.clone());
                PageOutcome::Failed(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Realtime
    // ------------------------------------------------------------------------

    /// Insert or merge a post pushed by the realtime service.
    pub fn apply_remote_post(&mut self, post: Post) -> Result<(), DropReason> {
        if !self.scope.matches(&post) {
            return Err(DropReason::ScopeMismatch);
        }
        let session = self.session.as_mut().ok_or(DropReason::NoActiveScope)?;
        session.store.upsert_one(post);
        Ok(())
    }

    /// Remove a deleted post. Scope hints, when present, must match.
    pub fn apply_remote_delete(&mut self, post: &PostRef) -> Result<(), DropReason> {
        if post.scope.is_some_and(|kind| kind != self.scope.kind)
            || (post.stage.is_some() && !self.scope.stage.matches(post.stage))
        {
            return Err(DropReason::ScopeMismatch);
        }
        let session = self.session.as_mut().ok_or(DropReason::NoActiveScope)?;
        session
            .store
            .remove(&post.id)
            .map(|_| ())
            .ok_or(DropReason::UnknownPost)
    }

    /// Another user liked or unliked a post.
    pub fn apply_foreign_like(&mut self, like: &LikeEvent) -> Result<(), DropReason> {
        let session = self.session.as_mut().ok_or(DropReason::NoActiveScope)?;
        session
            .store
            .patch(&like.post_id, |p| Post {
                like_count: Some(like.like_count.unwrap_or_else(|| {
                    if like.liked {
                        p.likes().saturating_add(1)
                    } else {
                        p.likes().saturating_sub(1)
                    }
                })),
                ..p.clone()
            })
            .map(|_| ())
            .ok_or(DropReason::UnknownPost)
    }

    /// The viewer's own like arrived without a matching pending mutation
    /// (e.g. made on another device). Applied only if it changes local state.
    pub fn apply_own_like(&mut self, like: &LikeEvent) -> Result<(), DropReason> {
        let session = self.session.as_mut().ok_or(DropReason::NoActiveScope)?;
        let current = session
            .store
            .get(&like.post_id)
            .ok_or(DropReason::UnknownPost)?;
        if current.is_liked() == like.liked && like.like_count.is_none() {
            return Err(DropReason::AlreadyApplied);
        }
        session.store.patch(&like.post_id, |p| set_liked(p, like.liked, like.like_count));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Optimistic likes
    // ------------------------------------------------------------------------

    /// Like a post locally and return the mutation to submit.
    pub fn like_post(
        &mut self,
        post_id: &str,
        viewer_id: &str,
    ) -> Result<(u64, MutationRequest), SyncError> {
        self.begin_like(post_id, viewer_id, true)
    }

    pub fn unlike_post(
        &mut self,
        post_id: &str,
        viewer_id: &str,
    ) -> Result<(u64, MutationRequest), SyncError> {
        self.begin_like(post_id, viewer_id, false)
    }

    /// Like if not yet liked, otherwise unlike.
    pub fn toggle_like(
        &mut self,
        post_id: &str,
        viewer_id: &str,
    ) -> Result<(u64, MutationRequest), SyncError> {
        let liked = self
            .get(post_id)
            .ok_or_else(|| SyncError::NotFound(post_id.to_string()))?
            .is_liked();
        self.begin_like(post_id, viewer_id, !liked)
    }

    fn begin_like(
        &mut self,
        post_id: &str,
        viewer_id: &str,
        liked: bool,
    ) -> Result<(u64, MutationRequest), SyncError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::NotFound(post_id.to_string()))?;
        let kind = if liked {
            MutationKind::Like
        } else {
            MutationKind::Unlike
        };
        let ticket = self
            .likes
            .begin(&mut session.store, post_id, kind, |p| set_liked(p, liked, None))?;
        Ok((
            ticket,
            MutationRequest {
                kind,
                target_id: post_id.to_string(),
                user_id: viewer_id.to_string(),
                value: json!({ "liked": liked }),
            },
        ))
    }

    /// Server acknowledged a like/unlike. Returns true if a pending entry matched.
    pub fn confirm_mutation(&mut self, post_id: &str, kind: MutationKind) -> bool {
        self.likes.confirm(post_id, kind).is_some()
    }

    /// Settle a submitted mutation identified by its ticket.
    ///
    /// Tickets from a discarded scope never match. Returns the entry when it
    /// was still pending.
    pub fn settle_mutation(
        &mut self,
        post_id: &str,
        ticket: u64,
        result: &Result<(), SyncError>,
    ) -> Option<PendingMutation<Post>> {
        if self.likes.ticket_of(post_id) != Some(ticket) {
            return None;
        }
        let kind = self.likes.get(post_id)?.kind;
        match result {
            Ok(()) => self.likes.confirm(post_id, kind),
            Err(_) => {
                let session = self.session.as_mut()?;
                self.likes.fail(&mut session.store, post_id, kind)
            }
        }
    }

    /// Roll back likes that were not acknowledged in time.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<PendingMutation<Post>> {
        match self.session.as_mut() {
            Some(session) => self.likes.expire_overdue(&mut session.store, now),
            None => Vec::new(),
        }
    }

    pub fn next_mutation_deadline(&self) -> Option<Instant> {
        self.likes.next_deadline()
    }
}

fn set_liked(post: &Post, liked: bool, authoritative_count: Option<u32>) -> Post {
    let count = authoritative_count.unwrap_or_else(|| match (post.is_liked(), liked) {
        (false, true) => post.likes().saturating_add(1),
        (true, false) => post.likes().saturating_sub(1),
        _ => post.likes(),
    });
    Post {
        like_count: Some(count),
        liked_by_viewer: Some(liked),
        ..post.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeedKind, StageFilter};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    const VIEWER: &str = "me";

    fn scope() -> FeedScope {
        FeedScope::new(FeedKind::Department, StageFilter::All)
    }

    fn post(id: &str, t: i64) -> Post {
        Post {
            id: id.to_string(),
            created_at: Utc.timestamp_opt(t, 0).unwrap(),
            scope: FeedKind::Department,
            stage: Some(2),
            like_count: Some(0),
            liked_by_viewer: Some(false),
            fields: Map::new(),
        }
    }

    fn page(prefix: &str, n: usize, start: i64) -> Vec<Post> {
        (0..n)
            .map(|i| post(&format!("{}{}", prefix, i), start - i as i64))
            .collect()
    }

    fn controller(page_size: usize) -> FeedSessionController {
        FeedSessionController::new(scope(), page_size, Duration::from_secs(10))
    }

    fn ready(page_size: usize, posts: Vec<Post>) -> FeedSessionController {
        let mut feed = controller(page_size);
        let req = feed.activate().unwrap();
        feed.apply_page(&req, Ok(posts));
        feed
    }

    fn ids(feed: &FeedSessionController) -> Vec<&str> {
        feed.visible_posts().iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_activate_then_first_page_ready() {
        let mut feed = controller(3);
        assert_eq!(feed.state(), FeedState::Idle);

        let req = feed.activate().unwrap();
        assert_eq!(req.kind, PageKind::First);
        assert_eq!((req.offset, req.limit), (0, 3));
        assert_eq!(feed.state(), FeedState::LoadingFirstPage);

        let outcome = feed.apply_page(&req, Ok(page("a", 3, 100)));
        assert_eq!(
            outcome,
            PageOutcome::Applied {
                count: 3,
                exhausted: false
            }
        );
        assert_eq!(feed.state(), FeedState::Ready);
        assert_eq!(ids(&feed), vec!["a0", "a1", "a2"]);
    }

    #[test]
    fn test_activate_twice_is_noop() {
        let mut feed = controller(3);
        assert!(feed.activate().is_some());
        assert!(feed.activate().is_none());
    }

    #[test]
    fn test_load_more_appends_and_exhausts() {
        let mut feed = ready(3, page("a", 3, 100));

        let req = feed.request_load_more().unwrap();
        assert_eq!((req.offset, req.limit), (3, 3));
        assert_eq!(feed.state(), FeedState::LoadingMore);

        let outcome = feed.apply_page(&req, Ok(page("b", 1, 50)));
        assert_eq!(
            outcome,
            PageOutcome::Applied {
                count: 1,
                exhausted: true
            }
        );
        assert_eq!(ids(&feed), vec!["a0", "a1", "a2", "b0"]);
        assert!(feed.request_load_more().is_none());
    }

    #[test]
    fn test_concurrent_load_more_is_ignored() {
        let mut feed = ready(3, page("a", 3, 100));
        assert!(feed.request_load_more().is_some());
        assert!(feed.request_load_more().is_none());
        assert!(feed.request_load_more().is_none());
    }

    #[test]
    fn test_load_more_overlap_does_not_duplicate() {
        let mut feed = ready(2, page("a", 2, 100));
        let req = feed.request_load_more().unwrap();
        // A new post shifted the window: a1 appears again
        feed.apply_page(&req, Ok(vec![post("a1", 99), post("b0", 50)]));
        assert_eq!(ids(&feed), vec!["a0", "a1", "b0"]);
    }

    #[test]
    fn test_scope_change_discards_and_drops_late_response() {
        let mut feed = ready(3, page("a", 3, 100));
        let late = feed.request_load_more().unwrap();

        assert!(feed.set_scope(FeedScope::new(FeedKind::Public, StageFilter::All)));
        assert_eq!(feed.state(), FeedState::Idle);
        assert!(feed.visible_posts().is_empty());

        assert_eq!(feed.apply_page(&late, Ok(page("x", 3, 10))), PageOutcome::Stale);
        assert!(feed.visible_posts().is_empty());
    }

    #[test]
    fn test_same_scope_is_not_a_change() {
        let mut feed = ready(3, page("a", 3, 100));
        assert!(!feed.set_scope(scope()));
        assert_eq!(feed.visible_posts().len(), 3);
    }

    #[test]
    fn test_refresh_supersedes_load_more() {
        let mut feed = ready(3, page("a", 3, 100));
        let more = feed.request_load_more().unwrap();
        let refresh = feed.refresh().unwrap();

        assert_eq!(feed.apply_page(&more, Ok(page("b", 3, 50))), PageOutcome::Stale);
        feed.apply_page(&refresh, Ok(page("r", 2, 200)));
        assert_eq!(ids(&feed), vec!["r0", "r1"]);
        assert!(feed.is_exhausted());
    }

    #[test]
    fn test_failed_refresh_keeps_content() {
        let mut feed = ready(3, page("a", 3, 100));
        let req = feed.refresh().unwrap();

        let outcome = feed.apply_page(&req, Err(SyncError::Network("offline".into())));
        assert!(matches!(outcome, PageOutcome::Failed(SyncError::Network(_))));
        assert_eq!(feed.state(), FeedState::Ready);
        assert_eq!(ids(&feed), vec!["a0", "a1", "a2"]);
        assert!(feed.last_error().is_some());
    }

    #[test]
    fn test_failed_first_load_returns_to_idle() {
        let mut feed = controller(3);
        let req = feed.activate().unwrap();
        feed.apply_page(&req, Err(SyncError::Network("offline".into())));
        assert_eq!(feed.state(), FeedState::Idle);
        assert!(feed.activate().is_some());
    }

    #[test]
    fn test_failed_load_more_keeps_cursor() {
        let mut feed = ready(3, page("a", 3, 100));
        let req = feed.request_load_more().unwrap();
        feed.apply_page(&req, Err(SyncError::Network("offline".into())));

        let retry = feed.request_load_more().unwrap();
        assert_eq!(retry.offset, 3);
    }

    #[test]
    fn test_remote_post_respects_scope() {
        let mut feed = ready(3, page("a", 3, 100));

        assert!(feed.apply_remote_post(post("new", 500)).is_ok());
        assert_eq!(ids(&feed)[0], "new");

        let mut other = post("elsewhere", 600);
        other.scope = FeedKind::Public;
        assert_eq!(
            feed.apply_remote_post(other),
            Err(DropReason::ScopeMismatch)
        );
    }

    #[test]
    fn test_remote_post_respects_stage() {
        let mut feed = controller(3);
        feed.set_scope(FeedScope::new(FeedKind::Department, StageFilter::Stage(4)));
        let req = feed.activate().unwrap();
        feed.apply_page(&req, Ok(vec![]));

        assert_eq!(
            feed.apply_remote_post(post("s2", 10)),
            Err(DropReason::ScopeMismatch)
        );
    }

    #[test]
    fn test_remote_post_while_idle_is_dropped() {
        let mut feed = controller(3);
        assert_eq!(
            feed.apply_remote_post(post("p", 1)),
            Err(DropReason::NoActiveScope)
        );
    }

    #[test]
    fn test_remote_delete() {
        let mut feed = ready(3, page("a", 3, 100));
        let target = PostRef {
            id: "a1".into(),
            scope: None,
            stage: None,
        };
        assert!(feed.apply_remote_delete(&target).is_ok());
        assert_eq!(feed.apply_remote_delete(&target), Err(DropReason::UnknownPost));
        assert_eq!(ids(&feed), vec!["a0", "a2"]);
    }

    #[test]
    fn test_like_then_fail_restores_post() {
        let mut feed = ready(3, page("a", 3, 100));
        let original = feed.get("a0").unwrap().clone();

        let (ticket, request) = feed.like_post("a0", VIEWER).unwrap();
        assert_eq!(request.kind, MutationKind::Like);
        assert_eq!(feed.get("a0").unwrap().likes(), 1);

        let settled = feed.settle_mutation("a0", ticket, &Err(SyncError::Network("x".into())));
        assert!(settled.is_some());
        assert_eq!(feed.get("a0").unwrap(), &original);
    }

    #[test]
    fn test_settle_with_foreign_ticket_is_ignored() {
        let mut feed = ready(3, page("a", 3, 100));
        let (ticket, _) = feed.like_post("a0", VIEWER).unwrap();
        assert!(feed
            .settle_mutation("a0", ticket + 1, &Ok(()))
            .is_none());
        assert!(feed.has_pending_mutation("a0"));
    }

    #[test]
    fn test_like_unknown_post_is_not_found() {
        let mut feed = ready(3, page("a", 3, 100));
        assert_eq!(
            feed.like_post("ghost", VIEWER).unwrap_err(),
            SyncError::NotFound("ghost".into())
        );
    }

    #[test]
    fn test_toggle_like_unlikes_liked_post() {
        let mut feed = ready(3, page("a", 3, 100));
        let (_, first) = feed.toggle_like("a0", VIEWER).unwrap();
        assert!(feed.confirm_mutation("a0", first.kind));

        let (_, second) = feed.toggle_like("a0", VIEWER).unwrap();
        assert_eq!(second.kind, MutationKind::Unlike);
        assert_eq!(feed.get("a0").unwrap().likes(), 0);
        assert!(!feed.get("a0").unwrap().is_liked());
    }

    #[test]
    fn test_foreign_like_adjusts_count() {
        let mut feed = ready(3, page("a", 3, 100));
        let mut like = LikeEvent {
            post_id: "a0".into(),
            user_id: "someone".into(),
            liked: true,
            like_count: None,
        };
        feed.apply_foreign_like(&like).unwrap();
        assert_eq!(feed.get("a0").unwrap().likes(), 1);
        assert!(!feed.get("a0").unwrap().is_liked());

        like.like_count = Some(12);
        feed.apply_foreign_like(&like).unwrap();
        assert_eq!(feed.get("a0").unwrap().likes(), 12);
    }

    #[test]
    fn test_own_like_from_elsewhere_is_not_double_counted() {
        let mut feed = ready(3, page("a", 3, 100));
        let like = LikeEvent {
            post_id: "a0".into(),
            user_id: VIEWER.into(),
            liked: true,
            like_count: None,
        };
        feed.apply_own_like(&like).unwrap();
        assert_eq!(feed.apply_own_like(&like), Err(DropReason::AlreadyApplied));
        assert_eq!(feed.get("a0").unwrap().likes(), 1);
    }

    #[test]
    fn test_scope_change_forgets_pending_likes() {
        let mut feed = ready(3, page("a", 3, 100));
        feed.like_post("a0", VIEWER).unwrap();
        feed.set_scope(FeedScope::new(FeedKind::Major, StageFilter::All));
        assert!(!feed.has_pending_mutation("a0"));
        assert!(feed.next_mutation_deadline().is_none());
    }
}
