//! Feed collection.
//!
//! Every configured source gets its own task. A task fetches its feed once
//! right away and, in continuous mode, again every `update` period until the
//! shared shutdown signal fires. Shutdown is only observed between cycles, so
//! a fetch in flight always finishes (or hits its own timeout) first.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SourceConfig;
use crate::db::{Article, Database};
use crate::fetcher::{extract, Fetcher};

/// Sources keyed by name. Entries sharing a name form one group.
pub type SourceGroups = BTreeMap<String, Vec<SourceConfig>>;

/// Destination for collected articles. Must tolerate concurrent callers.
#[async_trait]
pub trait ArticleSink: Send + Sync {
    async fn save(&self, articles: &[Article]) -> anyhow::Result<()>;
}

#[async_trait]
impl ArticleSink for Database {
    async fn save(&self, articles: &[Article]) -> anyhow::Result<()> {
        let inserted = self.save_articles(articles).await?;
        debug!("Stored {} new of {} articles", inserted, articles.len());
        Ok(())
    }
}

/// Dry-run sink that prints articles to stdout instead of storing them.
pub struct PrintSink;

#[async_trait]
impl ArticleSink for PrintSink {
    async fn save(&self, articles: &[Article]) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        for article in articles {
            writeln!(out, "{}", article)?;
        }
        Ok(())
    }
}

/// Shutdown signal shared by every collect loop. Sending `true` (or dropping
/// the sender) stops the loops at their next wait.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Group sources by name, keeping only `names` when any are given.
pub fn group_sources(sources: &[SourceConfig], names: &[String]) -> SourceGroups {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut groups = SourceGroups::new();

    for source in sources {
        if !wanted.is_empty() && !wanted.contains(source.name.as_str()) {
            continue;
        }
        groups
            .entry(source.name.clone())
            .or_default()
            .push(source.clone());
    }

    groups
}

/// Run one collect loop per source and wait for all of them to exit.
///
/// Without `continuous` every source is fetched exactly once. Errors in one
/// source are logged and never affect the others.
pub async fn collect(
    groups: SourceGroups,
    fetcher: Arc<Fetcher>,
    sink: Arc<dyn ArticleSink>,
    continuous: bool,
    shutdown: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();

    for (group, sources) in groups {
        info!("Processing feed group `{}` ({} sources)", group, sources.len());
        for source in sources {
            tasks.spawn(run_source(
                source,
                fetcher.clone(),
                sink.clone(),
                continuous,
                shutdown.clone(),
            ));
        }
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Collect loop ended abnormally: {}", e);
        }
    }

    info!("Feed collection finished");
}

async fn run_source(
    source: SourceConfig,
    fetcher: Arc<Fetcher>,
    sink: Arc<dyn ArticleSink>,
    continuous: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    run_cycle(&source, &fetcher, sink.as_ref()).await;

    if !continuous {
        return;
    }

    let mut ticker = time::interval_at(Instant::now() + source.update, source.update);
    // A tick that fires while a fetch is running is dropped, not queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender dropped, nobody is left to keep us running
                    break;
                }
            }
            _ = ticker.tick() => {
                run_cycle(&source, &fetcher, sink.as_ref()).await;
            }
        }
    }

    info!("{} collect loop terminating", source.name);
}

async fn run_cycle(source: &SourceConfig, fetcher: &Fetcher, sink: &dyn ArticleSink) {
    match process_source(source, fetcher, sink).await {
        Ok(count) => info!("Collected {} articles from '{}'", count, source.name),
        Err(e) => error!(
            "Failed to collect '{}' ({}): {:#}",
            source.name, source.url, e
        ),
    }
}

/// A single fetch cycle: fetch, extract, save. Returns how many articles
/// were handed to the sink.
pub async fn process_source(
    source: &SourceConfig,
    fetcher: &Fetcher,
    sink: &dyn ArticleSink,
) -> anyhow::Result<usize> {
    info!("Getting {} ({})", source.name, source.url);

    let feed = fetcher.fetch(&source.url, source.timeout).await?;
    let articles = extract(&feed, &source.name)?;
    sink.save(&articles).await?;

    Ok(articles.len())
}
