use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::FeedError;
use crate::model::FeedPhoto;

/// Requests from a [`FeedHandle`](crate::tasks::feed::FeedHandle) to the feed task.
#[derive(Debug)]
pub enum FeedCommand {
    Initialize(oneshot::Sender<Result<(), FeedError>>),
    LoadMore(oneshot::Sender<LoadMoreOutcome>),
    Refresh(oneshot::Sender<Result<(), FeedError>>),
    /// Indices of the rows currently on screen.
    ViewableItemsChanged(RangeInclusive<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// This many photos were appended (zero if every asset in the batch vanished).
    Appended(usize),
    /// Nothing left in this session; the list is unchanged.
    Exhausted,
    /// Another load, a refresh, or the initial load is in progress.
    Busy,
    /// The batch could not be fetched; scrolling again retries.
    Failed,
    /// A refresh replaced the session before the batch arrived.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadAheadStatus {
    #[default]
    Idle,
    InFlight,
    /// A batch of this many photos is buffered for the next load-more.
    Ready(usize),
}

/// Everything the presentation layer renders from.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub photos: Arc<Vec<FeedPhoto>>,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub is_refreshing: bool,
    pub has_more: bool,
    /// Set only by a failed initial load or refresh.
    pub error: Option<FeedError>,
    /// Items drawn from the session so far in this pass.
    pub shown: usize,
    /// Size of the session's universe.
    pub total: usize,
    pub read_ahead: ReadAheadStatus,
    /// I/O completions dropped because a refresh superseded them.
    pub stale_batches: u64,
}
