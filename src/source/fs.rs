//! Photo library backed by a directory tree.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use exif::{Exif, In, Tag, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::{AssetSource, Page, PageRequest, offset_window};
use crate::error::SourceError;
use crate::model::{GeoLocation, PhotoAsset, PhotoId};

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone)]
struct IndexEntry {
    id: PhotoId,
    path: PathBuf,
    created: SystemTime,
}

/// Serves every supported image below `root`, identified by its
/// `/`-separated path relative to the root.
///
/// The directory is walked when an enumeration starts (a page request
/// without a cursor); follow-up pages are served from that snapshot.
#[derive(Debug)]
pub struct FsAssetSource {
    root: PathBuf,
    index: Mutex<Option<Arc<Vec<IndexEntry>>>>,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn index_for(&self, request: &PageRequest) -> Result<Arc<Vec<IndexEntry>>, SourceError> {
        let mut cached = self.index.lock().await;
        if request.after.is_some() {
            if let Some(index) = cached.as_ref() {
                return Ok(Arc::clone(index));
            }
        }
        let root = self.root.clone();
        let index = Arc::new(blocking(move || scan_library(&root)).await?);
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }

    fn resolve(&self, id: &PhotoId) -> Option<PathBuf> {
        let relative = Path::new(id.as_str());
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        (contained && !id.as_str().is_empty()).then(|| self.root.join(relative))
    }
}

impl AssetSource for FsAssetSource {
    async fn identifier_page(&self, request: PageRequest) -> Result<Page<PhotoId>, SourceError> {
        let index = self.index_for(&request).await?;
        let (window, end_cursor) = offset_window(&request, index.len())?;
        Ok(Page {
            items: index[window].iter().map(|entry| entry.id.clone()).collect(),
            has_next_page: end_cursor.is_some(),
            end_cursor,
        })
    }

    async fn asset_page(&self, request: PageRequest) -> Result<Page<PhotoAsset>, SourceError> {
        let index = self.index_for(&request).await?;
        let (window, end_cursor) = offset_window(&request, index.len())?;
        let entries = index[window].to_vec();
        let items = blocking(move || {
            Ok(entries
                .iter()
                .filter_map(|entry| match read_asset(&entry.path, &entry.id) {
                    Ok(asset) => Some(asset),
                    Err(err) => {
                        warn!(id = %entry.id, error = %err, "skipping unreadable photo");
                        None
                    }
                })
                .collect::<Vec<_>>())
        })
        .await?;
        Ok(Page {
            items,
            has_next_page: end_cursor.is_some(),
            end_cursor,
        })
    }

    async fn asset(&self, id: &PhotoId) -> Result<PhotoAsset, SourceError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| SourceError::NotFound(id.clone()))?;
        let id = id.clone();
        blocking(move || read_asset(&path, &id)).await
    }
}

async fn blocking<T, F>(work: F) -> Result<T, SourceError>
where
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| SourceError::Worker(err.to_string()))?
}

#[instrument(skip_all, fields(root = %root.display()))]
fn scan_library(root: &Path) -> Result<Vec<IndexEntry>, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::Unavailable(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        // Skip hidden dot-directories *below* the root only.
        .filter_entry(|e| !should_skip_dir(e))
        .flatten()
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_supported_image(path) {
            continue;
        }
        let Some(id) = relative_id(root, path) else {
            debug!(path = %path.display(), "skipping path outside library root");
            continue;
        };
        entries.push(IndexEntry {
            id,
            created: file_created_at(path),
            path: path.to_path_buf(),
        });
    }

    // Newest first; ties broken by id so paging stays deterministic.
    entries.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
    info!(discovered = entries.len(), "library scan complete");
    Ok(entries)
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
}

fn should_skip_dir(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

fn relative_id(root: &Path, path: &Path) -> Option<PhotoId> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    Some(PhotoId::new(parts.join("/")))
}

fn file_created_at(path: &Path) -> SystemTime {
    match fs::metadata(path) {
        Ok(meta) => meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH),
        Err(_) => SystemTime::UNIX_EPOCH,
    }
}

fn read_asset(path: &Path, id: &PhotoId) -> Result<PhotoAsset, SourceError> {
    let meta = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Err(SourceError::NotFound(id.clone())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(SourceError::NotFound(id.clone()));
        }
        Err(err) => return Err(err.into()),
    };

    let (raw_w, raw_h) = image::image_dimensions(path).map_err(|err| SourceError::Metadata {
        id: id.clone(),
        reason: err.to_string(),
    })?;
    let exif = read_exif(path);
    let orientation = exif.as_ref().and_then(exif_orientation).unwrap_or(1);
    let (width, height) = if matches!(orientation, 5..=8) {
        (raw_h, raw_w)
    } else {
        (raw_w, raw_h)
    };

    let fs_created = meta.created().ok().map(DateTime::<Utc>::from);
    let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
    let created_at = exif
        .as_ref()
        .and_then(exif_taken_at)
        .or(fs_created)
        .or(modified_at);

    Ok(PhotoAsset {
        id: id.clone(),
        uri: format!("file://{}", path.display()),
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        width,
        height,
        created_at,
        modified_at,
        location: exif.as_ref().and_then(exif_location),
    })
}

fn read_exif(path: &Path) -> Option<Exif> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    exif::Reader::new().read_from_container(&mut buf).ok()
}

fn exif_orientation(exif: &Exif) -> Option<u32> {
    exif.get_field(Tag::Orientation, In::PRIMARY)?
        .value
        .get_uint(0)
}

fn exif_taken_at(exif: &Exif) -> Option<DateTime<Utc>> {
    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))?;
    let Value::Ascii(parts) = &field.value else {
        return None;
    };
    let stamp = exif::DateTime::from_ascii(parts.first()?).ok()?;
    let naive = NaiveDate::from_ymd_opt(
        i32::from(stamp.year),
        u32::from(stamp.month),
        u32::from(stamp.day),
    )?
    .and_hms_opt(
        u32::from(stamp.hour),
        u32::from(stamp.minute),
        u32::from(stamp.second),
    )?;
    match stamp.offset {
        Some(minutes) => FixedOffset::east_opt(i32::from(minutes) * 60)?
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc)),
        // No offset recorded: treat camera local time as UTC.
        None => Some(naive.and_utc()),
    }
}

fn exif_location(exif: &Exif) -> Option<GeoLocation> {
    Some(GeoLocation {
        latitude: gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?,
        longitude: gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?,
    })
}

fn gps_coordinate(exif: &Exif, tag: Tag, reference: Tag, negative_ref: u8) -> Option<f64> {
    let Value::Rational(dms) = &exif.get_field(tag, In::PRIMARY)?.value else {
        return None;
    };
    let [degrees, minutes, seconds] = dms.get(..3)? else {
        return None;
    };
    let value = degrees.to_f64() + minutes.to_f64() / 60.0 + seconds.to_f64() / 3600.0;
    if !value.is_finite() {
        return None;
    }
    let hemisphere = exif
        .get_field(reference, In::PRIMARY)
        .and_then(|field| match &field.value {
            Value::Ascii(parts) => parts.first().and_then(|part| part.first().copied()),
            _ => None,
        });
    Some(if hemisphere == Some(negative_ref) {
        -value
    } else {
        value
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_image(Path::new("/a/b.JPG")));
        assert!(is_supported_image(Path::new("c.webp")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("no-extension")));
    }

    #[test]
    fn ids_are_slash_separated_relative_paths() {
        let root = Path::new("/library");
        let id = relative_id(root, &root.join("2024").join("a.jpg")).unwrap();
        assert_eq!(id.as_str(), "2024/a.jpg");
    }

    #[test]
    fn ids_cannot_escape_the_root() {
        let source = FsAssetSource::new("/library");
        assert!(source.resolve(&PhotoId::from("../etc/passwd")).is_none());
        assert!(source.resolve(&PhotoId::from("/etc/passwd")).is_none());
        assert!(source.resolve(&PhotoId::from("")).is_none());
        assert_eq!(
            source.resolve(&PhotoId::from("2024/a.jpg")),
            Some(PathBuf::from("/library/2024/a.jpg"))
        );
    }
}
