use std::sync::Arc;

use thiserror::Error;

use crate::model::PhotoId;

/// Failures reported by an asset source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The library as a whole cannot be read (missing root, revoked access).
    #[error("photo library unavailable: {0}")]
    Unavailable(String),

    /// The asset disappeared between enumeration and fetch.
    #[error("photo {0} not found")]
    NotFound(PhotoId),

    /// The asset exists but its metadata could not be read.
    #[error("unreadable metadata for photo {id}: {reason}")]
    Metadata { id: PhotoId, reason: String },

    #[error("invalid page cursor {0:?}")]
    InvalidCursor(String),

    /// A page claimed a successor but carried no cursor to reach it.
    #[error("pagination stalled after {fetched} items: next page has no cursor")]
    StalledPagination { fetched: usize },

    /// Background worker panicked or was cancelled.
    #[error("asset source worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the failure concerns one asset only, so a batch can skip it.
    pub fn is_item_local(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Metadata { .. })
    }
}

/// Errors surfaced to the presentation layer.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("failed to enumerate photo library: {0}")]
    Enumeration(Arc<SourceError>),

    #[error("failed to load first photos: {0}")]
    InitialBatch(Arc<SourceError>),

    #[error("failed to refresh feed: {0}")]
    Refresh(Arc<SourceError>),

    #[error("feed task is no longer running")]
    Closed,
}

impl FeedError {
    /// The underlying source failure, if any.
    pub fn source_error(&self) -> Option<&SourceError> {
        match self {
            Self::Enumeration(err) | Self::InitialBatch(err) | Self::Refresh(err) => Some(err.as_ref()),
            Self::Closed => None,
        }
    }
}
