use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser};
use humantime::parse_rfc3339;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use photo_feed::config::Configuration;
use photo_feed::events::{FeedSnapshot, LoadMoreOutcome};
use photo_feed::source::AssetSource;
use photo_feed::source::fs::FsAssetSource;
use photo_feed::source::memory::MemoryAssetSource;
use photo_feed::tasks::feed::{self, FeedHandle, FeedSettings};

#[derive(Debug, Parser)]
#[command(
    name = "photo-feed",
    version,
    about = "Scroll a no-repeat shuffled photo feed from the terminal"
)]
struct Args {
    /// Path to YAML config (optional with --synthetic)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Deterministic shuffle seed; overrides shuffle-seed from the config
    #[arg(long = "feed-seed", value_name = "SEED")]
    feed_seed: Option<u64>,
    /// Freeze "now" for time-ago labels at this RFC 3339 instant
    #[arg(long = "feed-now", value_name = "RFC3339")]
    feed_now: Option<String>,
    /// Number of pages to scroll through, the first load included
    #[arg(long, value_name = "N", default_value_t = 3)]
    pages: usize,
    /// Pull to refresh after this many pages
    #[arg(long = "refresh-after", value_name = "N")]
    refresh_after: Option<usize>,
    /// Use an in-memory library of COUNT made-up photos instead of a directory
    #[arg(long, value_name = "COUNT")]
    synthetic: Option<usize>,
    /// Print one JSON object per page
    #[arg(long)]
    json: bool,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy)]
struct ScrollPlan {
    pages: usize,
    refresh_after: Option<usize>,
    json: bool,
}

fn init_tracing(verbosity: u8) {
    // RUST_LOG wins; otherwise -v raises the default level.
    let fallback = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        feed_seed,
        feed_now,
        pages,
        refresh_after,
        synthetic,
        json,
        verbose,
    } = Args::parse();
    init_tracing(verbose);

    let now_override: Option<DateTime<Utc>> = match feed_now {
        Some(ts) => Some(
            parse_rfc3339(&ts)
                .context("failed to parse --feed-now")?
                .into(),
        ),
        None => None,
    };

    let cfg = match (&config, synthetic) {
        (Some(path), _) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?
            .validated()
            .context("invalid configuration values")?,
        (None, Some(_)) => {
            let cfg = Configuration::default();
            cfg.feed.validate()?;
            cfg
        }
        (None, None) => bail!("either a CONFIG path or --synthetic is required"),
    };
    tracing::debug!("using configuration:\n{:#?}", cfg);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let settings = FeedSettings {
        options: cfg.feed.clone(),
        seed: feed_seed.or(cfg.shuffle_seed),
        now_override,
    };
    let plan = ScrollPlan {
        pages,
        refresh_after,
        json,
    };

    match synthetic {
        Some(count) => {
            let now = now_override.unwrap_or_else(Utc::now);
            let source = Arc::new(MemoryAssetSource::synthetic(count, now));
            scroll_feed(source, settings, plan, cancel).await
        }
        None => {
            let source = Arc::new(FsAssetSource::new(cfg.photo_library_path.clone()));
            scroll_feed(source, settings, plan, cancel).await
        }
    }
}

/// Drive the feed the way a user would: load, scroll to the end of the list,
/// optionally pull to refresh, and print every page that arrives.
async fn scroll_feed<S: AssetSource>(
    source: Arc<S>,
    settings: FeedSettings,
    plan: ScrollPlan,
    cancel: CancellationToken,
) -> Result<()> {
    let batch_size = settings.options.batch_size;
    let (handle, task) = feed::spawn(source, settings, cancel.clone());
    let mut scroll = handle.subscribe_scroll_to_top();

    handle
        .initialize()
        .await
        .context("failed to load the photo feed")?;
    let mut printed = print_page(&handle.snapshot(), 0, 1, plan.json)?;

    for page in 2..=plan.pages {
        if cancel.is_cancelled() {
            break;
        }

        if plan.refresh_after == Some(page - 1) {
            handle.refresh().await.context("refresh failed")?;
            if let Some(reason) = scroll.recv().await {
                tracing::info!(?reason, "scrolled back to top");
            }
            printed = print_page(&handle.snapshot(), 0, page, plan.json)?;
            continue;
        }

        let loaded = handle.snapshot().photos.len();
        let last = loaded.saturating_sub(1);
        handle
            .viewable_items_changed(last.saturating_sub(batch_size)..=last)
            .await?;

        match handle.load_more().await? {
            LoadMoreOutcome::Appended(_) => {
                printed = print_page(&handle.snapshot(), printed, page, plan.json)?;
            }
            LoadMoreOutcome::Exhausted => {
                if !plan.json {
                    println!("# end of feed");
                }
                break;
            }
            outcome => tracing::warn!(?outcome, page, "page did not load"),
        }
    }

    shutdown(handle, task).await
}

async fn shutdown(
    handle: FeedHandle,
    task: tokio::task::JoinHandle<Result<()>>,
) -> Result<()> {
    drop(handle);
    task.await.context("feed task panicked")?
}

/// Print photos from `from` onward; returns the new printed count.
fn print_page(snapshot: &FeedSnapshot, from: usize, page: usize, json: bool) -> Result<usize> {
    let fresh = snapshot.photos.get(from..).unwrap_or_default();

    if json {
        let line = serde_json::json!({
            "page": page,
            "shown": snapshot.shown,
            "total": snapshot.total,
            "has-more": snapshot.has_more,
            "photos": fresh,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!(
            "# page {page} ({} of {} drawn)",
            snapshot.shown, snapshot.total
        );
        if fresh.is_empty() {
            println!("  (no photos)");
        }
        for (offset, photo) in fresh.iter().enumerate() {
            println!(
                "  {:>4}: {} | {} | {}x{} | {}",
                from + offset + 1,
                photo.title,
                photo.time_ago,
                photo.asset.width,
                photo.asset.height,
                photo.id(),
            );
        }
    }
    Ok(snapshot.photos.len())
}
