//! Single-timeline driver for the feed, the chat list and realtime delivery.
//!
//! Every network call runs as a background task whose result comes back as a
//! [`SyncEvent`] on one bounded queue. Realtime envelopes are forwarded onto
//! the same queue, so page responses, mutation results and pushed events are
//! applied strictly one at a time, in arrival order, by [`SyncEngine::apply`].
//! Controllers never suspend while mutating state.

use super::chats::{BulkChats, BulkOutcome, BulkRequest, ChatListController, Section};
use super::feed::{FeedSessionController, PageOutcome, PageRequest};
use crate::backend::SyncBackend;
use crate::config::EngineSettings;
use crate::model::{FeedScope, MutationKind, MutationRequest, Post, SyncError};
use crate::mutation::{PendingMutation, Resolution};
use crate::realtime::{Collection, DispatchOutcome, RawEvent, RealtimeEventRouter, RouterStats};
use crate::store::PageWindow;
use crate::util::{catch_task_panic, Debouncer};
use futures::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Which controller owns a mutation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationScope {
    Feed,
    Chats,
}

/// A background task, identified well enough to recover from its panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundTask {
    FetchPage(PageRequest),
    FetchChats(BulkRequest),
    Submit {
        scope: MutationScope,
        target_id: String,
        ticket: u64,
    },
    Realtime {
        subscription: u64,
    },
}

impl BackgroundTask {
    fn name(&self) -> &'static str {
        match self {
            BackgroundTask::FetchPage(_) => "fetch_page",
            BackgroundTask::FetchChats(_) => "fetch_chats",
            BackgroundTask::Submit { .. } => "submit_mutation",
            BackgroundTask::Realtime { .. } => "realtime",
        }
    }
}

/// Items on the engine's apply queue.
#[derive(Debug)]
pub enum SyncEvent {
    PageLoaded {
        request: PageRequest,
        result: Result<Vec<Post>, SyncError>,
    },
    ChatsLoaded {
        request: BulkRequest,
        result: Result<BulkChats, SyncError>,
    },
    MutationSettled {
        scope: MutationScope,
        target_id: String,
        ticket: u64,
        result: Result<(), SyncError>,
    },
    Realtime(RawEvent),
    /// The subscription reported an error item.
    RealtimeError(SyncError),
    /// A subscription stream ended. `subscription` identifies which one.
    RealtimeClosed {
        subscription: u64,
    },
    TaskPanicked {
        task: BackgroundTask,
        error: String,
    },
}

/// What changed, for whoever renders the engine's state.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    FeedUpdated {
        scope: FeedScope,
    },
    FeedLoadFailed {
        error: SyncError,
        recoverable: bool,
    },
    ChatsUpdated,
    ChatsLoadFailed {
        error: SyncError,
        recoverable: bool,
    },
    MutationConfirmed {
        target_id: String,
        kind: MutationKind,
    },
    /// Advisory: local state has already been restored.
    MutationRolledBack {
        target_id: String,
        kind: MutationKind,
        error: SyncError,
    },
    RealtimeError {
        error: SyncError,
    },
    RealtimeDisconnected,
}

/// Owns both controllers, the realtime router, the apply queue and every
/// background task.
///
/// Methods that start network work must be called inside a tokio runtime.
pub struct SyncEngine {
    backend: Arc<dyn SyncBackend>,
    settings: EngineSettings,
    feed: FeedSessionController,
    chats: ChatListController,
    router: RealtimeEventRouter,
    /// Pending scope activation, keyed by the feed epoch it was scheduled at.
    scope_change: Debouncer<u64>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: mpsc::Receiver<SyncEvent>,
    tasks: JoinSet<()>,
    realtime_task: Option<JoinHandle<()>>,
    /// Bumped on every connect; a close from an older subscription is ignored.
    realtime_subscription: u64,
    notices: VecDeque<SyncNotice>,
}

enum Wake {
    Event(Option<SyncEvent>),
    Deadline,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn SyncBackend>, settings: EngineSettings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(settings.event_queue_capacity.max(1));
        Self {
            feed: FeedSessionController::new(
                FeedScope::default(),
                settings.page_size,
                settings.mutation_timeout,
            ),
            chats: ChatListController::new(&settings.viewer_id, settings.mutation_timeout),
            router: RealtimeEventRouter::new(&settings.viewer_id, settings.recent_event_capacity),
            scope_change: Debouncer::new(settings.scope_debounce),
            backend,
            settings,
            event_tx,
            event_rx,
            tasks: JoinSet::new(),
            realtime_task: None,
            realtime_subscription: 0,
            notices: VecDeque::new(),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.settings.viewer_id
    }

    pub fn feed(&self) -> &FeedSessionController {
        &self.feed
    }

    pub fn chats(&self) -> &ChatListController {
        &self.chats
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub fn visible_posts(&self) -> &[Post] {
        self.feed.visible_posts()
    }

    pub fn sections(&self) -> Vec<Section<'_>> {
        self.chats.sections()
    }

    pub fn unread_count(&self, chat_id: &str) -> u32 {
        self.chats.unread_count(chat_id)
    }

    // ------------------------------------------------------------------------
    // Realtime subscription
    // ------------------------------------------------------------------------

    /// Subscribe and forward envelopes onto the apply queue. No-op while a
    /// subscription is already running.
    pub fn connect_realtime(&mut self) {
        if self.is_realtime_connected() {
            return;
        }
        self.realtime_subscription = self.realtime_subscription.wrapping_add(1);
        let subscription = self.realtime_subscription;
        let backend = Arc::clone(&self.backend);
        let tx = self.event_tx.clone();
        self.realtime_task = Some(tokio::spawn(async move {
            let forward = forward_realtime(backend, tx.clone(), subscription);
            if let Err(error) = catch_task_panic(forward).await {
                tracing::error!(task = "realtime", error = %error, "Background task panicked");
                let _ = tx
                    .send(SyncEvent::TaskPanicked {
                        task: BackgroundTask::Realtime { subscription },
                        error,
                    })
                    .await;
            }
        }));
        tracing::debug!(subscription, "Realtime subscription started");
    }

    pub fn is_realtime_connected(&self) -> bool {
        self.realtime_task
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort the subscription task.
    pub fn disconnect_realtime(&mut self) {
        if let Some(handle) = self.realtime_task.take() {
            handle.abort();
            tracing::info!("Realtime subscription closed");
        }
    }

    // ------------------------------------------------------------------------
    // Feed
    // ------------------------------------------------------------------------

    /// Switch scope. The old scope's content is discarded immediately and page
    /// 1 of the new scope is fetched once selection has settled.
    pub fn select_feed_scope(&mut self, scope: FeedScope) -> bool {
        if !self.feed.set_scope(scope) {
            return false;
        }
        self.scope_change.schedule(self.feed.epoch());
        true
    }

    /// Fetch page 1 now, skipping any pending debounce.
    pub fn activate_feed(&mut self) {
        self.scope_change.cancel();
        if let Some(request) = self.feed.activate() {
            self.spawn_page(request);
        }
    }

    pub fn request_load_more(&mut self) {
        if let Some(request) = self.feed.request_load_more() {
            self.spawn_page(request);
        }
    }

    pub fn refresh_feed(&mut self) {
        self.scope_change.cancel();
        if let Some(request) = self.feed.refresh() {
            self.spawn_page(request);
        }
    }

    pub fn like_post(&mut self, post_id: &str) -> Result<(), SyncError> {
        let (ticket, request) = self.feed.like_post(post_id, &self.settings.viewer_id)?;
        self.spawn_submit(MutationScope::Feed, ticket, request);
        Ok(())
    }

    pub fn unlike_post(&mut self, post_id: &str) -> Result<(), SyncError> {
        let (ticket, request) = self.feed.unlike_post(post_id, &self.settings.viewer_id)?;
        self.spawn_submit(MutationScope::Feed, ticket, request);
        Ok(())
    }

    pub fn toggle_like(&mut self, post_id: &str) -> Result<(), SyncError> {
        let (ticket, request) = self.feed.toggle_like(post_id, &self.settings.viewer_id)?;
        self.spawn_submit(MutationScope::Feed, ticket, request);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------------

    pub fn activate_chats(&mut self) {
        if let Some(request) = self.chats.activate() {
            self.spawn_chats(request);
        }
    }

    pub fn refresh_chats(&mut self) {
        if let Some(request) = self.chats.refresh() {
            self.spawn_chats(request);
        }
    }

    /// Refresh both the feed and the chat list.
    pub fn refresh(&mut self) {
        self.refresh_feed();
        self.refresh_chats();
    }

    pub fn mark_chat_read(&mut self, chat_id: &str) -> Result<(), SyncError> {
        if let Some((ticket, request)) = self.chats.mark_read(chat_id)? {
            self.spawn_submit(MutationScope::Chats, ticket, request);
        }
        Ok(())
    }

    pub fn open_chat(&mut self, chat_id: &str) -> Result<(), SyncError> {
        if let Some((ticket, request)) = self.chats.open_chat(chat_id)? {
            self.spawn_submit(MutationScope::Chats, ticket, request);
        }
        Ok(())
    }

    pub fn close_chat(&mut self) {
        self.chats.close_chat();
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Drop every piece of per-user state and stop all background work.
    ///
    /// Results still in flight are sent to a queue nobody reads any more.
    pub fn logout(&mut self) {
        self.disconnect_realtime();
        self.tasks.abort_all();
        self.scope_change.cancel();
        let (event_tx, event_rx) = mpsc::channel(self.settings.event_queue_capacity.max(1));
        self.event_tx = event_tx;
        self.event_rx = event_rx;
        self.feed = FeedSessionController::new(
            FeedScope::default(),
            self.settings.page_size,
            self.settings.mutation_timeout,
        );
        self.chats =
            ChatListController::new(&self.settings.viewer_id, self.settings.mutation_timeout);
        self.router.reset();
        self.notices.clear();
        tracing::info!(viewer_id = %self.settings.viewer_id, "Logged out, sync state discarded");
    }

    // ------------------------------------------------------------------------
    // Apply queue
    // ------------------------------------------------------------------------

    /// Wait for the next queued event without applying it.
    pub async fn recv_event(&mut self) -> Option<SyncEvent> {
        self.event_rx.recv().await
    }

    /// Apply one queued event to controller state.
    pub fn apply(&mut self, event: SyncEvent) -> Option<SyncNotice> {
        match event {
            SyncEvent::PageLoaded { request, result } => {
                match self.feed.apply_page(&request, result) {
                    PageOutcome::Applied { .. } => Some(SyncNotice::FeedUpdated {
                        scope: request.scope,
                    }),
                    PageOutcome::Stale => None,
                    PageOutcome::Failed(error) => Some(SyncNotice::FeedLoadFailed {
                        recoverable: error.is_recoverable(),
                        error,
                    }),
                }
            }
            SyncEvent::ChatsLoaded { request, result } => {
                match self.chats.apply_bulk(&request, result) {
                    BulkOutcome::Applied { .. } => Some(SyncNotice::ChatsUpdated),
                    BulkOutcome::Stale => None,
                    BulkOutcome::Failed(error) => Some(SyncNotice::ChatsLoadFailed {
                        recoverable: error.is_recoverable(),
                        error,
                    }),
                }
            }
            SyncEvent::MutationSettled {
                scope,
                target_id,
                ticket,
                result,
            } => {
                let notice = match scope {
                    MutationScope::Feed => self
                        .feed
                        .settle_mutation(&target_id, ticket, &result)
                        .map(|entry| settled(entry, &result)),
                    MutationScope::Chats => self
                        .chats
                        .settle_read(&target_id, ticket, &result)
                        .map(|entry| settled(entry, &result)),
                };
                if notice.is_none() {
                    tracing::debug!(
                        target_id = %target_id,
                        ticket,
                        "Mutation result arrived after resolution, ignoring"
                    );
                }
                notice
            }
            SyncEvent::Realtime(raw) => {
                match self.router.route(&raw, &mut self.feed, &mut self.chats) {
                    DispatchOutcome::Applied(Collection::Post | Collection::Like) => {
                        Some(SyncNotice::FeedUpdated {
                            scope: self.feed.scope(),
                        })
                    }
                    DispatchOutcome::Applied(_) => Some(SyncNotice::ChatsUpdated),
                    DispatchOutcome::Reconciled { target_id, kind } => {
                        Some(SyncNotice::MutationConfirmed { target_id, kind })
                    }
                    DispatchOutcome::Dropped(_) | DispatchOutcome::Malformed(_) => None,
                }
            }
            SyncEvent::RealtimeError(error) => {
                if matches!(error, SyncError::MalformedEvent(_)) {
                    tracing::warn!(error = %error, "Undecodable realtime envelope");
                    return None;
                }
                tracing::warn!(error = %error, "Realtime subscription error");
                Some(SyncNotice::RealtimeError { error })
            }
            SyncEvent::RealtimeClosed { subscription } => {
                if subscription != self.realtime_subscription {
                    tracing::debug!(
                        subscription,
                        current = self.realtime_subscription,
                        "Close of a replaced realtime subscription, ignoring"
                    );
                    return None;
                }
                if let Some(handle) = self.realtime_task.take() {
                    handle.abort();
                }
                tracing::info!(subscription, "Realtime subscription ended");
                Some(SyncNotice::RealtimeDisconnected)
            }
            SyncEvent::TaskPanicked { task, error } => {
                let failure = SyncError::Network(format!(
                    "{} task panicked: {}",
                    task.name(),
                    error
                ));
                let recovery = match task {
                    BackgroundTask::FetchPage(request) => SyncEvent::PageLoaded {
                        request,
                        result: Err(failure),
                    },
                    BackgroundTask::FetchChats(request) => SyncEvent::ChatsLoaded {
                        request,
                        result: Err(failure),
                    },
                    BackgroundTask::Submit {
                        scope,
                        target_id,
                        ticket,
                    } => SyncEvent::MutationSettled {
                        scope,
                        target_id,
                        ticket,
                        result: Err(failure),
                    },
                    BackgroundTask::Realtime { subscription } => {
                        SyncEvent::RealtimeClosed { subscription }
                    }
                };
                self.apply(recovery)
            }
        }
    }

    /// Timer work: fire a settled scope change and roll back overdue mutations.
    pub fn tick(&mut self, now: Instant) -> Vec<SyncNotice> {
        if let Some(epoch) = self.scope_change.fire_due(now) {
            if epoch == self.feed.epoch() {
                self.activate_feed();
            } else {
                tracing::debug!(
                    scheduled = epoch,
                    current = self.feed.epoch(),
                    "Scope activation superseded"
                );
            }
        }

        let mut notices: Vec<SyncNotice> = self
            .feed
            .expire_overdue(now)
            .into_iter()
            .map(timed_out)
            .collect();
        notices.extend(self.chats.expire_overdue(now).into_iter().map(timed_out));
        notices
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.scope_change.deadline(),
            self.feed.next_mutation_deadline(),
            self.chats.next_mutation_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Apply queued events and timers until something worth reporting happens.
    ///
    /// Returns `None` only if the queue has closed.
    pub async fn next_notice(&mut self) -> Option<SyncNotice> {
        loop {
            if let Some(notice) = self.notices.pop_front() {
                return Some(notice);
            }

            let deadline = self.next_deadline();
            let wake = tokio::select! {
                biased;
                event = self.event_rx.recv() => Wake::Event(event),
                _ = sleep_until(deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Event(Some(event)) => {
                    if let Some(notice) = self.apply(event) {
                        self.notices.push_back(notice);
                    }
                }
                Wake::Event(None) => return None,
                Wake::Deadline => {
                    let notices = self.tick(Instant::now());
                    self.notices.extend(notices);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    fn spawn_page(&mut self, request: PageRequest) {
        let backend = Arc::clone(&self.backend);
        let limit = self.settings.request_timeout;
        self.spawn(BackgroundTask::FetchPage(request), async move {
            let window = PageWindow {
                offset: request.offset,
                limit: request.limit,
            };
            let result = bounded(limit, backend.fetch_page(request.scope, window)).await;
            SyncEvent::PageLoaded { request, result }
        });
    }

    fn spawn_chats(&mut self, request: BulkRequest) {
        let backend = Arc::clone(&self.backend);
        let limit = self.settings.request_timeout;
        let task = BackgroundTask::FetchChats(request.clone());
        self.spawn(task, async move {
            let fetch = async {
                if request.initialize_membership {
                    backend.initialize_membership(&request.user_id).await?;
                }
                let buckets = backend.fetch_bulk_chats(&request.user_id).await?;
                let unread = backend
                    .fetch_unread_counts(&request.user_id, &buckets.chat_ids())
                    .await?;
                Ok::<_, SyncError>(BulkChats { buckets, unread })
            };
            let result = bounded(limit, fetch).await;
            SyncEvent::ChatsLoaded { request, result }
        });
    }

    fn spawn_submit(&mut self, scope: MutationScope, ticket: u64, request: MutationRequest) {
        let backend = Arc::clone(&self.backend);
        let limit = self.settings.request_timeout;
        let task = BackgroundTask::Submit {
            scope,
            target_id: request.target_id.clone(),
            ticket,
        };
        self.spawn(task, async move {
            let result = bounded(limit, backend.submit_mutation(&request)).await;
            SyncEvent::MutationSettled {
                scope,
                target_id: request.target_id,
                ticket,
                result,
            }
        });
    }

    fn spawn<F>(&mut self, task: BackgroundTask, work: F)
    where
        F: Future<Output = SyncEvent> + Send + 'static,
    {
        while self.tasks.try_join_next().is_some() {}

        let tx = self.event_tx.clone();
        self.tasks.spawn(async move {
            let event = match catch_task_panic(work).await {
                Ok(event) => event,
                Err(error) => {
                    tracing::error!(task = task.name(), error = %error, "Background task panicked");
                    SyncEvent::TaskPanicked { task, error }
                }
            };
            if tx.send(event).await.is_err() {
                tracing::debug!("Apply queue closed, dropping background result");
            }
        });
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.realtime_task.take() {
            handle.abort();
            tracing::debug!("Aborted realtime task on engine drop");
        }
        self.tasks.abort_all();
    }
}

async fn forward_realtime(
    backend: Arc<dyn SyncBackend>,
    tx: mpsc::Sender<SyncEvent>,
    subscription: u64,
) {
    let mut stream = match backend.subscribe_realtime().await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::warn!(error = %error, "Realtime subscription failed");
            let _ = tx.send(SyncEvent::RealtimeError(error)).await;
            let _ = tx.send(SyncEvent::RealtimeClosed { subscription }).await;
            return;
        }
    };

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(raw) => SyncEvent::Realtime(raw),
            Err(error) => SyncEvent::RealtimeError(error),
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
    let _ = tx.send(SyncEvent::RealtimeClosed { subscription }).await;
}

async fn bounded<T>(
    limit: Duration,
    work: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
        Err(SyncError::Network(format!(
            "Request timed out after {}s",
            limit.as_secs()
        )))
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn settled<T>(entry: PendingMutation<T>, result: &Result<(), SyncError>) -> SyncNotice {
    match (entry.resolution, result) {
        (Resolution::Failed, Err(error)) => SyncNotice::MutationRolledBack {
            target_id: entry.target_id,
            kind: entry.kind,
            error: error.clone(),
        },
        _ => SyncNotice::MutationConfirmed {
            target_id: entry.target_id,
            kind: entry.kind,
        },
    }
}

fn timed_out<T>(entry: PendingMutation<T>) -> SyncNotice {
    SyncNotice::MutationRolledBack {
        error: SyncError::Timeout {
            target_id: entry.target_id.clone(),
            kind: entry.kind,
        },
        target_id: entry.target_id,
        kind: entry.kind,
    }
}
