//! Asset sources: where the feed's photos come from.
//!
//! A source enumerates the library page by page (newest first) and hydrates
//! single assets by identifier. The free functions here layer the policies the
//! feed relies on: full enumeration that yields between pages, and batch
//! hydration that tolerates assets vanishing underneath it.

pub mod fs;
pub mod memory;

use std::future::Future;
use std::ops::Range;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::model::{PhotoAsset, PhotoId};

/// Opaque continuation token handed back by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Resume after this cursor; `None` starts a fresh enumeration.
    pub after: Option<PageCursor>,
    pub first: usize,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub end_cursor: Option<PageCursor>,
    pub has_next_page: bool,
}

/// Resolve an offset-encoded cursor into the index window it selects, plus the
/// cursor for the following page.
pub(crate) fn offset_window(
    request: &PageRequest,
    len: usize,
) -> Result<(Range<usize>, Option<PageCursor>), SourceError> {
    let offset = match &request.after {
        Some(cursor) => cursor
            .as_str()
            .parse::<usize>()
            .map_err(|_| SourceError::InvalidCursor(cursor.as_str().to_string()))?,
        None => 0,
    };
    let start = offset.min(len);
    let end = start.saturating_add(request.first).min(len);
    let next = (end < len).then(|| PageCursor::new(end.to_string()));
    Ok((start..end, next))
}

/// A photo library the feed can page through.
///
/// Pages are ordered by creation time, newest first, and stay stable while an
/// enumeration is in progress.
pub trait AssetSource: Send + Sync + 'static {
    fn identifier_page(
        &self,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page<PhotoId>, SourceError>> + Send;

    fn asset_page(
        &self,
        request: PageRequest,
    ) -> impl Future<Output = Result<Page<PhotoAsset>, SourceError>> + Send;

    fn asset(&self, id: &PhotoId) -> impl Future<Output = Result<PhotoAsset, SourceError>> + Send;
}

pub async fn list_all_identifiers<S: AssetSource>(
    source: &S,
    page_size: usize,
) -> Result<Vec<PhotoId>, SourceError> {
    collect_pages("identifiers", page_size, move |request| {
        source.identifier_page(request)
    })
    .await
}

pub async fn list_all_assets<S: AssetSource>(
    source: &S,
    page_size: usize,
) -> Result<Vec<PhotoAsset>, SourceError> {
    collect_pages("assets", page_size, move |request| source.asset_page(request)).await
}

async fn collect_pages<T, F, Fut>(
    kind: &'static str,
    page_size: usize,
    mut fetch: F,
) -> Result<Vec<T>, SourceError>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, SourceError>>,
{
    let started = Instant::now();
    let mut items = Vec::new();
    let mut after = None;
    let mut pages = 0usize;

    loop {
        let page = fetch(PageRequest {
            after: after.take(),
            first: page_size.max(1),
        })
        .await?;
        pages += 1;
        items.extend(page.items);

        if pages % 10 == 0 {
            debug!(kind, pages, loaded = items.len(), "enumeration progress");
        }
        if !page.has_next_page {
            break;
        }
        match page.end_cursor {
            Some(cursor) => after = Some(cursor),
            None => {
                return Err(SourceError::StalledPagination {
                    fetched: items.len(),
                });
            }
        }
        // Large libraries take many pages; let other tasks run in between.
        tokio::task::yield_now().await;
    }

    info!(
        kind,
        count = items.len(),
        pages,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "library enumeration complete"
    );
    Ok(items)
}

/// Hydrate `ids` in order with at most `concurrency` lookups in flight.
///
/// Assets that vanished or have unreadable metadata are dropped from the
/// result; any other failure aborts the whole batch.
pub async fn get_assets_by_identifiers<S: AssetSource>(
    source: &S,
    ids: &[PhotoId],
    concurrency: usize,
) -> Result<Vec<PhotoAsset>, SourceError> {
    let mut lookups = stream::iter(ids.iter().cloned())
        .map(move |id| async move {
            let result = source.asset(&id).await;
            (id, result)
        })
        .buffered(concurrency.max(1));

    let mut assets = Vec::with_capacity(ids.len());
    while let Some((id, result)) = lookups.next().await {
        match result {
            Ok(asset) => assets.push(asset),
            Err(err) if err.is_item_local() => {
                warn!(id = %id, error = %err, "skipping photo that failed to load");
            }
            Err(err) => return Err(err),
        }
    }

    if assets.len() < ids.len() {
        debug!(
            requested = ids.len(),
            loaded = assets.len(),
            "batch hydrated short"
        );
    }
    Ok(assets)
}
