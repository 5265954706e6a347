//! Display labels derived from asset metadata.

use chrono::{DateTime, Utc};

use crate::model::PhotoAsset;

const MINUTE_SECS: i64 = 60;
const HOUR_SECS: i64 = 60 * MINUTE_SECS;
const DAY_SECS: i64 = 24 * HOUR_SECS;
const MONTH_SECS: i64 = 30 * DAY_SECS;
const YEAR_SECS: i64 = 365 * DAY_SECS;

pub const UNTITLED: &str = "Untitled";

/// Pick a feed title: creation month first, then the bare filename.
pub fn photo_title(asset: &PhotoAsset) -> String {
    if let Some(created) = asset.created_at {
        return month_title(created);
    }
    let stem = strip_extension(&asset.filename);
    if stem.is_empty() {
        UNTITLED.to_string()
    } else {
        stem.to_string()
    }
}

pub fn month_title(ts: DateTime<Utc>) -> String {
    ts.format("%B %Y").to_string()
}

/// Coarse relative age of `ts` as seen from `now`.
pub fn time_ago(ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(ts) = ts else {
        return "unknown".to_string();
    };
    let diff = (now - ts).num_seconds();
    if diff < MINUTE_SECS {
        // Future timestamps (clock skew) land here too.
        return "just now".to_string();
    }
    let (count, unit) = if diff < HOUR_SECS {
        (diff / MINUTE_SECS, "minute")
    } else if diff < DAY_SECS {
        (diff / HOUR_SECS, "hour")
    } else if diff < MONTH_SECS {
        (diff / DAY_SECS, "day")
    } else if diff < YEAR_SECS {
        (diff / MONTH_SECS, "month")
    } else {
        (diff / YEAR_SECS, "year")
    };
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

fn strip_extension(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .filter(|(_, ext)| !ext.is_empty())
        .map_or(filename, |(stem, _)| stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhotoId;
    use chrono::{Duration, TimeZone};

    fn asset(filename: &str, created_at: Option<DateTime<Utc>>) -> PhotoAsset {
        PhotoAsset {
            id: PhotoId::from(filename),
            uri: format!("file:///photos/{filename}"),
            filename: filename.to_string(),
            width: 4,
            height: 3,
            created_at,
            modified_at: None,
            location: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn title_prefers_creation_month() {
        let created = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(photo_title(&asset("IMG_0001.JPG", Some(created))), "March 2024");
    }

    #[test]
    fn title_falls_back_to_filename_stem() {
        assert_eq!(photo_title(&asset("beach.day.jpg", None)), "beach.day");
        assert_eq!(photo_title(&asset("README", None)), "README");
    }

    #[test]
    fn trailing_dot_is_not_an_extension() {
        assert_eq!(photo_title(&asset("a.", None)), "a.");
        assert_eq!(photo_title(&asset("scan..", None)), "scan..");
        assert_eq!(photo_title(&asset("a.b.", None)), "a.b.");
    }

    #[test]
    fn title_untitled_when_nothing_usable() {
        assert_eq!(photo_title(&asset(".jpg", None)), UNTITLED);
        assert_eq!(photo_title(&asset("", None)), UNTITLED);
    }

    #[test]
    fn time_ago_buckets() {
        let now = now();
        assert_eq!(time_ago(None, now), "unknown");
        assert_eq!(time_ago(Some(now + Duration::minutes(5)), now), "just now");
        assert_eq!(time_ago(Some(now - Duration::seconds(59)), now), "just now");
        assert_eq!(time_ago(Some(now - Duration::minutes(1)), now), "1 minute ago");
        assert_eq!(time_ago(Some(now - Duration::minutes(42)), now), "42 minutes ago");
        assert_eq!(time_ago(Some(now - Duration::hours(3)), now), "3 hours ago");
        assert_eq!(time_ago(Some(now - Duration::days(1)), now), "1 day ago");
        assert_eq!(time_ago(Some(now - Duration::days(29)), now), "29 days ago");
        assert_eq!(time_ago(Some(now - Duration::days(30)), now), "1 month ago");
        assert_eq!(time_ago(Some(now - Duration::days(364)), now), "12 months ago");
        assert_eq!(time_ago(Some(now - Duration::days(800)), now), "2 years ago");
    }
}
