use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// How the feed obtains photo data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Enumerate identifiers only and hydrate each batch on demand. Keeps
    /// memory flat for very large libraries at the cost of a lookup per batch.
    #[default]
    IdentifierFirst,
    /// Enumerate full assets up front; batches are served straight from memory.
    FullAsset,
}

/// What a user-triggered refresh does with the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Reshuffle the universe captured at initialization; no new fetch.
    #[default]
    Reshuffle,
    /// Enumerate the library again so photos added since start show up.
    Refetch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FeedOptions {
    /// Photos per initial load, load-more, refresh and read-ahead.
    pub batch_size: usize,
    /// Fraction of the loaded list the user must scroll past to start a read-ahead.
    pub preload_threshold: f64,
    /// Page size used while enumerating the library.
    pub page_size: usize,
    /// Maximum concurrent asset lookups while hydrating one batch.
    pub hydrate_concurrency: usize,
    pub fetch_strategy: FetchStrategy,
    pub refresh_policy: RefreshPolicy,
    /// Capacity of the command channel between handles and the feed task.
    pub command_buffer: usize,
}

impl FeedOptions {
    const fn default_batch_size() -> usize {
        10
    }

    const fn default_preload_threshold() -> f64 {
        0.5
    }

    const fn default_page_size() -> usize {
        500
    }

    const fn default_hydrate_concurrency() -> usize {
        4
    }

    const fn default_command_buffer() -> usize {
        32
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "feed.batch-size must be greater than zero");
        ensure!(
            self.preload_threshold.is_finite()
                && self.preload_threshold > 0.0
                && self.preload_threshold <= 1.0,
            "feed.preload-threshold must be within (0, 1]"
        );
        ensure!(self.page_size > 0, "feed.page-size must be greater than zero");
        ensure!(
            self.hydrate_concurrency > 0,
            "feed.hydrate-concurrency must be greater than zero"
        );
        ensure!(
            self.command_buffer > 0,
            "feed.command-buffer must be greater than zero"
        );
        Ok(())
    }
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
            preload_threshold: Self::default_preload_threshold(),
            page_size: Self::default_page_size(),
            hydrate_concurrency: Self::default_hydrate_concurrency(),
            fetch_strategy: FetchStrategy::default(),
            refresh_policy: RefreshPolicy::default(),
            command_buffer: Self::default_command_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Root directory scanned recursively for photos.
    pub photo_library_path: PathBuf,
    /// Optional deterministic seed for the session shuffle.
    pub shuffle_seed: Option<u64>,
    /// Pagination and read-ahead behavior of the feed.
    pub feed: FeedOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.photo_library_path.as_os_str().is_empty(),
            "photo-library-path must not be empty"
        );
        self.feed.validate().context("invalid feed configuration")?;
        Ok(self)
    }
}
