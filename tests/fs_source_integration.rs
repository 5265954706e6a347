use base64::Engine;
use photo_feed::error::SourceError;
use photo_feed::model::PhotoId;
use photo_feed::source::fs::FsAssetSource;
use photo_feed::source::{self, AssetSource};
use photo_feed::tasks::feed::{self, FeedSettings};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

// JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
const ORIENT6_JPEG: &str = concat!(
    "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
    "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
);

fn write_photo(path: &Path) {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(ORIENT6_JPEG)
        .unwrap();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

/// a.jpg, nested/b.JPEG, plus files the scan must ignore.
fn library(root: &Path) {
    write_photo(&root.join("a.jpg"));
    write_photo(&root.join("nested").join("b.JPEG"));
    write_photo(&root.join(".thumbnails").join("c.jpg"));
    fs::write(root.join("notes.txt"), b"not a photo").unwrap();
}

fn sorted(mut ids: Vec<PhotoId>) -> Vec<String> {
    ids.sort();
    ids.into_iter().map(|id| id.as_str().to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enumerates_supported_images_recursively() {
    let tmp = tempdir().unwrap();
    library(tmp.path());
    let source = FsAssetSource::new(tmp.path());

    let ids = source::list_all_identifiers(&source, 100).await.unwrap();
    assert_eq!(sorted(ids), vec!["a.jpg", "nested/b.JPEG"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn small_pages_walk_the_cached_index() {
    let tmp = tempdir().unwrap();
    library(tmp.path());
    write_photo(&tmp.path().join("z.png.jpg"));
    let source = FsAssetSource::new(tmp.path());

    let ids = source::list_all_identifiers(&source, 1).await.unwrap();
    assert_eq!(ids.len(), 3);
    let assets = source::list_all_assets(&source, 2).await.unwrap();
    assert_eq!(assets.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hydration_applies_exif_orientation() {
    let tmp = tempdir().unwrap();
    library(tmp.path());
    let source = FsAssetSource::new(tmp.path());

    let asset = source.asset(&PhotoId::from("nested/b.JPEG")).await.unwrap();
    assert_eq!((asset.width, asset.height), (1, 2));
    assert_eq!(asset.filename, "b.JPEG");
    assert!(asset.uri.starts_with("file://"));
    assert!(asset.created_at.is_some());
    assert!(asset.location.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_and_missing_photos_are_skipped_in_a_batch() {
    let tmp = tempdir().unwrap();
    library(tmp.path());
    fs::write(tmp.path().join("broken.jpg"), b"x").unwrap();
    let source = FsAssetSource::new(tmp.path());

    let err = source.asset(&PhotoId::from("broken.jpg")).await.unwrap_err();
    assert!(matches!(err, SourceError::Metadata { .. }), "{err:?}");
    let err = source.asset(&PhotoId::from("gone.jpg")).await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)), "{err:?}");

    let batch = [
        PhotoId::from("a.jpg"),
        PhotoId::from("broken.jpg"),
        PhotoId::from("gone.jpg"),
        PhotoId::from("nested/b.JPEG"),
    ];
    let assets = source::get_assets_by_identifiers(&source, &batch, 2).await.unwrap();
    let loaded: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(loaded, vec!["a.jpg", "nested/b.JPEG"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identifiers_cannot_escape_the_library() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("lib");
    library(&root);
    write_photo(&tmp.path().join("outside.jpg"));
    let source = FsAssetSource::new(&root);

    let err = source.asset(&PhotoId::from("../outside.jpg")).await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_root_is_unavailable() {
    let tmp = tempdir().unwrap();
    let source = FsAssetSource::new(tmp.path().join("does-not-exist"));

    let err = source::list_all_identifiers(&source, 100).await.unwrap_err();
    assert!(matches!(err, SourceError::Unavailable(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_pages_through_a_directory() {
    let tmp = tempdir().unwrap();
    library(tmp.path());
    fs::write(tmp.path().join("broken.jpg"), b"x").unwrap();
    let source = Arc::new(FsAssetSource::new(tmp.path()));

    let mut settings = FeedSettings {
        seed: Some(1),
        ..FeedSettings::default()
    };
    settings.options.batch_size = 10;
    let (handle, _task) = feed::spawn(source, settings, CancellationToken::new());

    handle.initialize().await.unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.photos.len(), 2);
    assert!(!snapshot.has_more);
    assert!(snapshot.photos.iter().all(|p| (p.asset.width, p.asset.height) == (1, 2)));
}
