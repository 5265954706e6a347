//! In-process library, used for synthetic runs and as a test double.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Duration, Utc};

use super::{AssetSource, Page, PageRequest, offset_window};
use crate::error::SourceError;
use crate::model::{GeoLocation, PhotoAsset, PhotoId};

#[derive(Debug, Default)]
pub struct MemoryAssetSource {
    assets: RwLock<Vec<PhotoAsset>>,
    unavailable: AtomicBool,
    identifier_pages: AtomicUsize,
    asset_lookups: AtomicUsize,
}

impl MemoryAssetSource {
    pub fn new(mut assets: Vec<PhotoAsset>) -> Self {
        sort_newest_first(&mut assets);
        Self {
            assets: RwLock::new(assets),
            ..Self::default()
        }
    }

    /// `count` made-up photos taken an hour apart, the newest at `now`.
    pub fn synthetic(count: usize, now: DateTime<Utc>) -> Self {
        let assets = (0..count)
            .map(|idx| {
                let created = now - Duration::hours(idx as i64);
                let (width, height) = if idx % 2 == 0 {
                    (4032, 3024)
                } else {
                    (3024, 4032)
                };
                let filename = format!("IMG_{idx:05}.JPG");
                PhotoAsset {
                    id: PhotoId::new(format!("mem-{idx:05}")),
                    uri: format!("memory://{filename}"),
                    filename,
                    width,
                    height,
                    created_at: Some(created),
                    modified_at: Some(created),
                    location: (idx % 3 == 0).then_some(GeoLocation {
                        latitude: 37.5665 + idx as f64 * 1e-4,
                        longitude: 126.978,
                    }),
                }
            })
            .collect();
        Self::new(assets)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn insert(&self, asset: PhotoAsset) {
        let mut assets = self.assets.write().unwrap_or_else(PoisonError::into_inner);
        assets.push(asset);
        sort_newest_first(&mut assets);
    }

    /// Forget an asset, as if it was deleted from the device.
    pub fn remove(&self, id: &PhotoId) -> bool {
        let mut assets = self.assets.write().unwrap_or_else(PoisonError::into_inner);
        let before = assets.len();
        assets.retain(|asset| &asset.id != id);
        assets.len() != before
    }

    /// While set, every call fails as if library access was revoked.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn identifier_pages_served(&self) -> usize {
        self.identifier_pages.load(Ordering::SeqCst)
    }

    pub fn asset_lookups(&self) -> usize {
        self.asset_lookups.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PhotoAsset>> {
        self.assets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("memory library offline".into()))
        } else {
            Ok(())
        }
    }

    fn page_of<T>(
        &self,
        request: &PageRequest,
        map: impl Fn(&PhotoAsset) -> T,
    ) -> Result<Page<T>, SourceError> {
        self.check_available()?;
        let assets = self.read();
        let (window, end_cursor) = offset_window(request, assets.len())?;
        Ok(Page {
            items: assets[window].iter().map(map).collect(),
            has_next_page: end_cursor.is_some(),
            end_cursor,
        })
    }
}

impl AssetSource for MemoryAssetSource {
    async fn identifier_page(&self, request: PageRequest) -> Result<Page<PhotoId>, SourceError> {
        self.identifier_pages.fetch_add(1, Ordering::SeqCst);
        self.page_of(&request, |asset| asset.id.clone())
    }

    async fn asset_page(&self, request: PageRequest) -> Result<Page<PhotoAsset>, SourceError> {
        self.page_of(&request, PhotoAsset::clone)
    }

    async fn asset(&self, id: &PhotoId) -> Result<PhotoAsset, SourceError> {
        self.asset_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.read()
            .iter()
            .find(|asset| &asset.id == id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.clone()))
    }
}

fn sort_newest_first(assets: &mut [PhotoAsset]) {
    // `None` sorts below `Some`, so undated photos end up last.
    assets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PageCursor;
    use chrono::TimeZone;

    #[tokio::test]
    async fn pages_chain_through_cursors() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let source = MemoryAssetSource::synthetic(5, now);

        let first = source
            .identifier_page(PageRequest {
                after: None,
                first: 3,
            })
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.has_next_page);

        let second = source
            .identifier_page(PageRequest {
                after: first.end_cursor,
                first: 3,
            })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_next_page);
        assert!(second.end_cursor.is_none());
    }

    #[tokio::test]
    async fn garbage_cursor_is_rejected() {
        let source = MemoryAssetSource::synthetic(2, Utc::now());
        let err = source
            .asset_page(PageRequest {
                after: Some(PageCursor::new("not-a-number")),
                first: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidCursor(_)));
    }

    #[test]
    fn undated_assets_sort_last() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let source = MemoryAssetSource::synthetic(2, now);
        let mut undated = source.read()[0].clone();
        undated.id = PhotoId::from("undated");
        undated.created_at = None;
        source.insert(undated);
        assert_eq!(source.read().last().map(|a| a.id.as_str()), Some("undated"));
        assert!(source.remove(&PhotoId::from("undated")));
        assert!(!source.remove(&PhotoId::from("undated")));
        assert_eq!(source.len(), 2);
    }
}
