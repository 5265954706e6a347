use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::format;

/// Opaque, stable identifier of one asset in the photo library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PhotoId(Arc<str>);

impl PhotoId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PhotoId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Full record for one photo as returned by an asset source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoAsset {
    pub id: PhotoId,
    pub uri: String,
    pub filename: String,
    /// Pixel width as displayed (EXIF orientation applied).
    pub width: u32,
    pub height: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub location: Option<GeoLocation>,
}

/// A photo as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPhoto {
    #[serde(flatten)]
    pub asset: PhotoAsset,
    pub title: String,
    pub time_ago: String,
}

impl FeedPhoto {
    pub fn from_asset(asset: PhotoAsset, now: DateTime<Utc>) -> Self {
        let title = format::photo_title(&asset);
        let time_ago = format::time_ago(asset.created_at, now);
        Self {
            asset,
            title,
            time_ago,
        }
    }

    pub fn id(&self) -> &PhotoId {
        &self.asset.id
    }
}
