//! Long-running mode: hourly batch rotation plus an inbox of ingestion files.
//!
//! Inbox files are `*.json` [`IngestRequest`] documents. Each one is renamed
//! to `.done` or `.failed` once processed so it is never applied twice.
//!
//! One-shot `rotate` runs may share the data directory, so the live batch is
//! re-read from the store before every rotation and every inbox file.

use anyhow::{Context, Result};
use draftstat_engine::{DocumentStore, IndicatorEngine, IngestRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

const INBOX_EXTENSION: &str = "json";
const DONE_EXTENSION: &str = "done";
const FAILED_EXTENSION: &str = "failed";

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub inbox: Option<PathBuf>,
    pub poll_every: Duration,
    pub once: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboxTally {
    pub files: usize,
    pub failed: usize,
}

impl InboxTally {
    fn add(&mut self, other: Self) {
        self.files += other.files;
        self.failed += other.failed;
    }
}

/// Run until ctrl-c, or a single inbox pass with `once`.
pub async fn serve<S: DocumentStore>(
    engine: &IndicatorEngine<S>,
    options: &ServeOptions,
) -> Result<InboxTally> {
    let mut tally = InboxTally::default();
    if options.once {
        if let Some(inbox) = &options.inbox {
            tally.add(drain_inbox(engine, inbox).await?);
        }
        return Ok(tally);
    }

    let mut rotation = interval(engine.config().rotation_interval());
    rotation.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately; rotating at startup would cut a batch short
    rotation.tick().await;
    let mut poll = interval(options.poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    log::info!(
        "serving: rotation every {:?}, inbox {:?}",
        engine.config().rotation_interval(),
        options.inbox
    );

    loop {
        tokio::select! {
            _ = rotation.tick() => {
                catch_up(engine);
                match engine.rotate() {
                    Ok(outcome) => log::info!("scheduled rotation: {outcome:?}"),
                    Err(err) => log::error!("scheduled rotation failed: {err}"),
                }
            }
            _ = poll.tick(), if options.inbox.is_some() => {
                if let Some(inbox) = &options.inbox {
                    match drain_inbox(engine, inbox).await {
                        Ok(pass) => tally.add(pass),
                        Err(err) => log::error!("inbox pass failed: {err:#}"),
                    }
                }
            }
            _ = &mut shutdown => {
                log::info!("shutdown requested");
                break;
            }
        }
    }
    Ok(tally)
}

fn catch_up<S: DocumentStore>(engine: &IndicatorEngine<S>) {
    match engine.sync_with_store() {
        Ok(true) => log::info!("adopted batch {:?} from the store", engine.version().batch()),
        Ok(false) => {}
        Err(err) => log::warn!("could not re-read the live batch: {err}"),
    }
}

fn pending_files(inbox: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(inbox)
        .with_context(|| format!("failed to read inbox {}", inbox.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|extension| extension == INBOX_EXTENSION)
        })
        .collect();
    files.sort();
    Ok(files)
}

async fn drain_inbox<S: DocumentStore>(
    engine: &IndicatorEngine<S>,
    inbox: &Path,
) -> Result<InboxTally> {
    let mut tally = InboxTally::default();
    for path in pending_files(inbox)? {
        tally.files += 1;
        let outcome = match ingest_file(engine, &path).await {
            Ok(()) => DONE_EXTENSION,
            Err(err) => {
                log::error!("{}: {err:#}", path.display());
                tally.failed += 1;
                FAILED_EXTENSION
            }
        };
        let target = path.with_extension(outcome);
        tokio::fs::rename(&path, &target)
            .await
            .with_context(|| format!("failed to move {}", path.display()))?;
    }
    Ok(tally)
}

async fn ingest_file<S: DocumentStore>(engine: &IndicatorEngine<S>, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let request: IngestRequest =
        serde_json::from_str(&content).context("not an ingestion request")?;
    catch_up(engine);
    let summary = engine.ingest_async(&request).await?;
    log::info!(
        "{}: {} of {} games applied",
        path.display(),
        summary.games_applied,
        summary.games_seen
    );
    Ok(())
}
