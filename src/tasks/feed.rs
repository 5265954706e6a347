use std::collections::HashMap;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::{SeedableRng, rngs::StdRng};
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{self, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FeedOptions, FetchStrategy, RefreshPolicy};
use crate::error::{FeedError, SourceError};
use crate::events::{FeedCommand, FeedSnapshot, LoadMoreOutcome, ReadAheadStatus};
use crate::model::{FeedPhoto, PhotoAsset, PhotoId};
use crate::session::PhotoSession;
use crate::signal::{ScrollReason, ScrollSubscription, ScrollToTop};
use crate::source::{self, AssetSource};

/// What a session shuffles: bare identifiers or whole assets.
pub trait SessionItem: Clone + Send + Sync + 'static {
    fn enumerate<S: AssetSource>(
        source: &S,
        page_size: usize,
    ) -> impl Future<Output = Result<Vec<Self>, SourceError>> + Send;

    fn hydrate<S: AssetSource>(
        source: &S,
        batch: &[Self],
        concurrency: usize,
    ) -> impl Future<Output = Result<Vec<PhotoAsset>, SourceError>> + Send;
}

impl SessionItem for PhotoId {
    async fn enumerate<S: AssetSource>(source: &S, page_size: usize) -> Result<Vec<Self>, SourceError> {
        source::list_all_identifiers(source, page_size).await
    }

    async fn hydrate<S: AssetSource>(
        source: &S,
        batch: &[Self],
        concurrency: usize,
    ) -> Result<Vec<PhotoAsset>, SourceError> {
        source::get_assets_by_identifiers(source, batch, concurrency).await
    }
}

impl SessionItem for PhotoAsset {
    async fn enumerate<S: AssetSource>(source: &S, page_size: usize) -> Result<Vec<Self>, SourceError> {
        source::list_all_assets(source, page_size).await
    }

    async fn hydrate<S: AssetSource>(
        _source: &S,
        batch: &[Self],
        _concurrency: usize,
    ) -> Result<Vec<PhotoAsset>, SourceError> {
        Ok(batch.to_vec())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedSettings {
    pub options: FeedOptions,
    /// Deterministic shuffle seed; OS entropy when absent.
    pub seed: Option<u64>,
    /// Freeze "now" for time-ago labels.
    pub now_override: Option<DateTime<Utc>>,
}

/// Cheap, cloneable front door to a running feed task.
///
/// Once an `initialize`, `load_more` or `refresh` call returns, [`snapshot`]
/// already reflects its outcome.
///
/// [`snapshot`]: FeedHandle::snapshot
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    state: watch::Receiver<FeedSnapshot>,
    scroll: ScrollToTop,
}

impl FeedHandle {
    /// Load the library and the first batch. Returns immediately once initialized.
    pub async fn initialize(&self) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.send(FeedCommand::Initialize(tx)).await?;
        rx.await.map_err(|_| FeedError::Closed)?
    }

    pub async fn load_more(&self) -> Result<LoadMoreOutcome, FeedError> {
        let (tx, rx) = oneshot::channel();
        self.send(FeedCommand::LoadMore(tx)).await?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    /// Start a new shuffled pass and replace the visible list with its first batch.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.send(FeedCommand::Refresh(tx)).await?;
        rx.await.map_err(|_| FeedError::Closed)?
    }

    /// Report the visible rows; may start a read-ahead. Does not wait for it.
    pub async fn viewable_items_changed(&self, visible: RangeInclusive<usize>) -> Result<(), FeedError> {
        self.send(FeedCommand::ViewableItemsChanged(visible)).await
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.state.clone()
    }

    pub fn scroll_to_top(&self) -> usize {
        self.scroll.trigger(ScrollReason::Requested)
    }

    pub fn subscribe_scroll_to_top(&self) -> ScrollSubscription {
        self.scroll.subscribe()
    }

    async fn send(&self, command: FeedCommand) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedError::Closed)
    }
}

/// Spawn the feed task for `source`. The task ends when `cancel` fires or
/// every handle is dropped.
pub fn spawn<S: AssetSource>(
    source: Arc<S>,
    settings: FeedSettings,
    cancel: CancellationToken,
) -> (FeedHandle, JoinHandle<Result<()>>) {
    match settings.options.fetch_strategy {
        FetchStrategy::IdentifierFirst => spawn_with::<S, PhotoId>(source, settings, cancel),
        FetchStrategy::FullAsset => spawn_with::<S, PhotoAsset>(source, settings, cancel),
    }
}

fn spawn_with<S: AssetSource, T: SessionItem>(
    source: Arc<S>,
    settings: FeedSettings,
    cancel: CancellationToken,
) -> (FeedHandle, JoinHandle<Result<()>>) {
    let (command_tx, command_rx) = mpsc::channel(settings.options.command_buffer.max(1));
    let (state_tx, state_rx) = watch::channel(FeedSnapshot::default());
    let scroll = ScrollToTop::new();

    let rng = match settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let feed = Feed::<S, T>::new(source, settings, rng, state_tx, scroll.clone());
    let task = tokio::spawn(run(feed, command_rx, cancel));

    let handle = FeedHandle {
        commands: command_tx,
        state: state_rx,
        scroll,
    };
    (handle, task)
}

/// Owns all feed state; commands and I/O completions are applied one at a
/// time, so the session is never touched concurrently.
///
/// Rules:
/// - Every I/O task is tagged with the epoch it was spawned in. Initializing
///   or refreshing advances the epoch, and completions from an older epoch
///   are dropped.
/// - At most one read-ahead exists. A load-more never draws while one is
///   pending; it consumes the buffered batch or waits for the in-flight one.
/// - Items drawn for a batch that failed to load are served again by the
///   next draw, so a failed load-more loses nothing.
/// - A failed refresh leaves an empty list over a restarted pass, so the
///   list and the session never disagree about what was shown.
async fn run<S: AssetSource, T: SessionItem>(
    mut feed: Feed<S, T>,
    mut commands: mpsc::Receiver<FeedCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    feed.publish();

    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!("cancel received; exiting feed task");
                break;
            }

            maybe_command = commands.recv() => match maybe_command {
                Some(command) => feed.handle_command(command),
                None => {
                    debug!("all feed handles dropped; exiting feed task");
                    break;
                }
            },

            Some(joined) = feed.tasks.join_next_with_id() => match joined {
                Ok((id, work)) => feed.handle_completion(id, work),
                Err(err) => {
                    error!("feed worker failed: {err}");
                    feed.recover_lost_worker(err.id(), &err.to_string());
                }
            },
        }
        feed.publish();
    }

    feed.tasks.abort_all();
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Initial,
    More,
    ReadAhead,
    Refresh,
}

enum Work<T> {
    Enumerated(Result<Vec<T>, SourceError>),
    Batch(Result<Vec<PhotoAsset>, SourceError>),
}

/// Bookkeeping for one spawned worker, keyed by its task id.
struct Job<T> {
    epoch: u64,
    purpose: Purpose,
    /// Items a batch worker is hydrating; `None` for an enumeration.
    drawn: Option<Arc<[T]>>,
}

#[derive(Default)]
enum ReadAhead {
    #[default]
    Idle,
    InFlight,
    Ready(Vec<FeedPhoto>),
}

struct Feed<S, T> {
    source: Arc<S>,
    options: FeedOptions,
    now_override: Option<DateTime<Utc>>,
    session: PhotoSession<T>,
    /// Drawn from the session but not delivered; served before new draws.
    undelivered: Vec<T>,
    epoch: u64,
    initialized: bool,
    loading: bool,
    loading_more: bool,
    refreshing: bool,
    error: Option<FeedError>,
    photos: Arc<Vec<FeedPhoto>>,
    read_ahead: ReadAhead,
    init_waiters: Vec<oneshot::Sender<Result<(), FeedError>>>,
    refresh_waiters: Vec<oneshot::Sender<Result<(), FeedError>>>,
    more_waiter: Option<oneshot::Sender<LoadMoreOutcome>>,
    tasks: JoinSet<Work<T>>,
    jobs: HashMap<task::Id, Job<T>>,
    stale_batches: u64,
    state_tx: watch::Sender<FeedSnapshot>,
    scroll: ScrollToTop,
}

impl<S: AssetSource, T: SessionItem> Feed<S, T> {
    fn new(
        source: Arc<S>,
        settings: FeedSettings,
        rng: StdRng,
        state_tx: watch::Sender<FeedSnapshot>,
        scroll: ScrollToTop,
    ) -> Self {
        Self {
            source,
            options: settings.options,
            now_override: settings.now_override,
            session: PhotoSession::with_rng(rng),
            undelivered: Vec::new(),
            epoch: 0,
            initialized: false,
            loading: false,
            loading_more: false,
            refreshing: false,
            error: None,
            photos: Arc::new(Vec::new()),
            read_ahead: ReadAhead::Idle,
            init_waiters: Vec::new(),
            refresh_waiters: Vec::new(),
            more_waiter: None,
            tasks: JoinSet::new(),
            jobs: HashMap::new(),
            stale_batches: 0,
            state_tx,
            scroll,
        }
    }

    fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Initialize(reply) => self.initialize(reply),
            FeedCommand::LoadMore(reply) => self.load_more(reply),
            FeedCommand::Refresh(reply) => self.refresh(reply),
            FeedCommand::ViewableItemsChanged(visible) => self.viewable_items_changed(visible),
        }
    }

    fn initialize(&mut self, reply: oneshot::Sender<Result<(), FeedError>>) {
        if self.initialized {
            let _ = reply.send(Ok(()));
            return;
        }
        self.init_waiters.push(reply);
        if self.loading {
            return;
        }

        self.loading = true;
        self.error = None;
        self.advance_epoch();
        info!(
            strategy = ?self.options.fetch_strategy,
            page_size = self.options.page_size,
            "loading photo library"
        );
        self.spawn_enumeration(Purpose::Initial);
    }

    fn load_more(&mut self, reply: oneshot::Sender<LoadMoreOutcome>) {
        if !self.initialized || self.loading || self.refreshing || self.loading_more {
            let _ = reply.send(LoadMoreOutcome::Busy);
            return;
        }

        match std::mem::take(&mut self.read_ahead) {
            ReadAhead::Ready(batch) => {
                let appended = self.append(batch);
                debug!(appended, "load-more served from read-ahead");
                self.start_read_ahead();
                self.publish();
                let _ = reply.send(LoadMoreOutcome::Appended(appended));
            }
            ReadAhead::InFlight => {
                debug!("load-more waiting for in-flight read-ahead");
                self.read_ahead = ReadAhead::InFlight;
                self.loading_more = true;
                self.more_waiter = Some(reply);
            }
            ReadAhead::Idle => {
                let drawn = self.draw();
                if drawn.is_empty() {
                    debug!(shown = self.session.shown_count(), "session exhausted");
                    let _ = reply.send(LoadMoreOutcome::Exhausted);
                    return;
                }
                self.loading_more = true;
                self.more_waiter = Some(reply);
                self.spawn_batch(Purpose::More, drawn);
            }
        }
    }

    fn refresh(&mut self, reply: oneshot::Sender<Result<(), FeedError>>) {
        if !self.initialized {
            // Nothing to reshuffle yet; a refresh doubles as (a retry of) initialize.
            self.initialize(reply);
            return;
        }
        self.refresh_waiters.push(reply);
        if self.refreshing {
            return;
        }

        self.refreshing = true;
        self.error = None;
        self.advance_epoch();
        if self.loading_more {
            self.complete_load_more(LoadMoreOutcome::Superseded);
        }
        info!(policy = ?self.options.refresh_policy, "refreshing feed");

        match self.options.refresh_policy {
            RefreshPolicy::Reshuffle => {
                self.session.reset();
                self.serve_first_batch(Purpose::Refresh);
            }
            RefreshPolicy::Refetch => self.spawn_enumeration(Purpose::Refresh),
        }
    }

    fn viewable_items_changed(&mut self, visible: RangeInclusive<usize>) {
        if !self.initialized || self.photos.is_empty() {
            return;
        }
        let last_visible = (*visible.start()).max(*visible.end());
        let threshold = self.photos.len() as f64 * self.options.preload_threshold;
        if last_visible as f64 >= threshold && matches!(self.read_ahead, ReadAhead::Idle) {
            debug!(last_visible, loaded = self.photos.len(), "scroll crossed preload threshold");
            self.start_read_ahead();
        }
    }

    fn handle_completion(&mut self, id: task::Id, work: Work<T>) {
        let Some(job) = self.jobs.remove(&id) else {
            warn!(%id, "completion from an untracked feed worker");
            return;
        };
        if job.epoch != self.epoch {
            self.discard_stale(job.purpose, job.epoch);
            return;
        }
        let purpose = job.purpose;

        match work {
            Work::Enumerated(Ok(universe)) => {
                info!(total = universe.len(), ?purpose, "photo library loaded");
                self.session.initialize(universe);
                self.serve_first_batch(purpose);
            }
            Work::Enumerated(Err(err)) => {
                warn!(error = %err, ?purpose, "photo library enumeration failed");
                let err = Arc::new(err);
                match purpose {
                    Purpose::Initial => self.finish_reload(purpose, Err(FeedError::Enumeration(err))),
                    _ => self.fail_refresh(None, FeedError::Refresh(err)),
                }
            }
            Work::Batch(result) => match (purpose, result) {
                (Purpose::Initial | Purpose::Refresh, Ok(assets)) => {
                    self.photos = Arc::new(self.to_feed(assets));
                    self.finish_reload(purpose, Ok(()));
                }
                (Purpose::Initial, Err(err)) => {
                    warn!(error = %err, "first batch failed to load");
                    self.finish_reload(purpose, Err(FeedError::InitialBatch(Arc::new(err))));
                }
                (Purpose::Refresh, Err(err)) => {
                    warn!(error = %err, "refresh batch failed to load");
                    self.fail_refresh(job.drawn, FeedError::Refresh(Arc::new(err)));
                }
                (Purpose::More, Ok(assets)) => {
                    let batch = self.to_feed(assets);
                    let appended = self.append(batch);
                    self.loading_more = false;
                    self.start_read_ahead();
                    self.complete_load_more(LoadMoreOutcome::Appended(appended));
                }
                (Purpose::More, Err(err)) => {
                    warn!(error = %err, "failed to load more photos");
                    self.requeue(job.drawn);
                    self.complete_load_more(LoadMoreOutcome::Failed);
                }
                (Purpose::ReadAhead, Ok(assets)) => {
                    let batch = self.to_feed(assets);
                    if self.loading_more {
                        self.read_ahead = ReadAhead::Idle;
                        let appended = self.append(batch);
                        self.loading_more = false;
                        self.start_read_ahead();
                        self.complete_load_more(LoadMoreOutcome::Appended(appended));
                    } else {
                        debug!(buffered = batch.len(), "read-ahead ready");
                        self.read_ahead = ReadAhead::Ready(batch);
                    }
                }
                (Purpose::ReadAhead, Err(err)) => {
                    warn!(error = %err, "read-ahead failed");
                    self.fail_read_ahead(job.drawn);
                }
            },
        }
    }

    /// A worker panicked. Only the operation that spawned it in the current
    /// epoch is failed; a lost worker from an older epoch is just stale.
    fn recover_lost_worker(&mut self, id: task::Id, reason: &str) {
        let Some(job) = self.jobs.remove(&id) else {
            return;
        };
        if job.epoch != self.epoch {
            self.discard_stale(job.purpose, job.epoch);
            return;
        }
        let lost = Arc::new(SourceError::Worker(reason.to_string()));
        match job.purpose {
            Purpose::Initial if job.drawn.is_some() => {
                self.finish_reload(Purpose::Initial, Err(FeedError::InitialBatch(lost)));
            }
            Purpose::Initial => self.finish_reload(Purpose::Initial, Err(FeedError::Enumeration(lost))),
            Purpose::Refresh => self.fail_refresh(job.drawn, FeedError::Refresh(lost)),
            Purpose::More => {
                self.requeue(job.drawn);
                self.complete_load_more(LoadMoreOutcome::Failed);
            }
            Purpose::ReadAhead => self.fail_read_ahead(job.drawn),
        }
    }

    /// A refresh has already restarted the pass, so the old list is dropped
    /// and the pass starts over from whatever the failed step drew.
    fn fail_refresh(&mut self, drawn: Option<Arc<[T]>>, err: FeedError) {
        self.photos = Arc::new(Vec::new());
        match drawn {
            Some(drawn) => self.undelivered = drawn.to_vec(),
            None => self.session.reset(),
        }
        self.finish_reload(Purpose::Refresh, Err(err));
    }

    fn fail_read_ahead(&mut self, drawn: Option<Arc<[T]>>) {
        self.read_ahead = ReadAhead::Idle;
        self.requeue(drawn);
        if self.loading_more {
            self.complete_load_more(LoadMoreOutcome::Failed);
        }
    }

    fn requeue(&mut self, drawn: Option<Arc<[T]>>) {
        if let Some(drawn) = drawn {
            self.undelivered = drawn.to_vec();
        }
    }

    fn serve_first_batch(&mut self, purpose: Purpose) {
        let drawn = self.draw();
        if drawn.is_empty() {
            info!("photo library is empty");
            self.photos = Arc::new(Vec::new());
            self.finish_reload(purpose, Ok(()));
            return;
        }
        self.spawn_batch(purpose, drawn);
    }

    /// Settle an initial load or refresh and answer everyone waiting on it.
    fn finish_reload(&mut self, purpose: Purpose, result: Result<(), FeedError>) {
        let waiters = match purpose {
            Purpose::Initial => {
                self.loading = false;
                self.initialized = result.is_ok();
                std::mem::take(&mut self.init_waiters)
            }
            _ => {
                self.refreshing = false;
                std::mem::take(&mut self.refresh_waiters)
            }
        };
        self.error = result.as_ref().err().cloned();

        if result.is_ok() {
            info!(
                visible = self.photos.len(),
                total = self.session.total_count(),
                ?purpose,
                "feed ready"
            );
            if purpose == Purpose::Refresh {
                self.scroll.trigger(ScrollReason::Refreshed);
            }
            self.start_read_ahead();
        }
        self.publish();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn start_read_ahead(&mut self) {
        if !self.initialized
            || self.loading
            || self.refreshing
            || self.loading_more
            || !matches!(self.read_ahead, ReadAhead::Idle)
        {
            return;
        }
        let drawn = self.draw();
        if drawn.is_empty() {
            return;
        }
        debug!(count = drawn.len(), "starting read-ahead");
        self.read_ahead = ReadAhead::InFlight;
        self.spawn_batch(Purpose::ReadAhead, drawn);
    }

    /// Settle the pending load-more. Callers finish their state changes
    /// first so the reply never races ahead of the published snapshot.
    fn complete_load_more(&mut self, outcome: LoadMoreOutcome) {
        self.loading_more = false;
        debug!(?outcome, "load-more settled");
        self.publish();
        if let Some(waiter) = self.more_waiter.take() {
            let _ = waiter.send(outcome);
        }
    }

    fn draw(&mut self) -> Vec<T> {
        if !self.undelivered.is_empty() {
            return std::mem::take(&mut self.undelivered);
        }
        self.session.next_batch(self.options.batch_size)
    }

    fn advance_epoch(&mut self) {
        self.epoch += 1;
        self.read_ahead = ReadAhead::Idle;
        self.undelivered.clear();
    }

    fn discard_stale(&mut self, purpose: Purpose, epoch: u64) {
        self.stale_batches += 1;
        debug!(?purpose, epoch, current = self.epoch, "discarding stale completion");
    }

    fn spawn_enumeration(&mut self, purpose: Purpose) {
        let source = Arc::clone(&self.source);
        let page_size = self.options.page_size;
        let worker = self
            .tasks
            .spawn(async move { Work::Enumerated(T::enumerate(&*source, page_size).await) });
        self.jobs.insert(
            worker.id(),
            Job {
                epoch: self.epoch,
                purpose,
                drawn: None,
            },
        );
    }

    fn spawn_batch(&mut self, purpose: Purpose, drawn: Vec<T>) {
        let drawn: Arc<[T]> = drawn.into();
        let items = Arc::clone(&drawn);
        let source = Arc::clone(&self.source);
        let concurrency = self.options.hydrate_concurrency;
        let worker = self
            .tasks
            .spawn(async move { Work::Batch(T::hydrate(&*source, &items, concurrency).await) });
        self.jobs.insert(
            worker.id(),
            Job {
                epoch: self.epoch,
                purpose,
                drawn: Some(drawn),
            },
        );
    }

    fn to_feed(&self, assets: Vec<PhotoAsset>) -> Vec<FeedPhoto> {
        let now = self.now_override.unwrap_or_else(Utc::now);
        assets
            .into_iter()
            .map(|asset| FeedPhoto::from_asset(asset, now))
            .collect()
    }

    fn append(&mut self, batch: Vec<FeedPhoto>) -> usize {
        let appended = batch.len();
        if appended > 0 {
            Arc::make_mut(&mut self.photos).extend(batch);
        }
        appended
    }

    fn has_more(&self) -> bool {
        self.initialized
            && (self.session.has_more()
                || !self.undelivered.is_empty()
                || !matches!(self.read_ahead, ReadAhead::Idle))
    }

    fn publish(&self) {
        let read_ahead = match &self.read_ahead {
            ReadAhead::Idle => ReadAheadStatus::Idle,
            ReadAhead::InFlight => ReadAheadStatus::InFlight,
            ReadAhead::Ready(batch) => ReadAheadStatus::Ready(batch.len()),
        };
        self.state_tx.send_replace(FeedSnapshot {
            photos: Arc::clone(&self.photos),
            is_loading: self.loading,
            is_loading_more: self.loading_more,
            is_refreshing: self.refreshing,
            has_more: self.has_more(),
            error: self.error.clone(),
            shown: self.session.shown_count(),
            total: self.session.total_count(),
            read_ahead,
            stale_batches: self.stale_batches,
        });
    }
}
