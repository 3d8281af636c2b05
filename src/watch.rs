//! Reload triggers via filesystem notifications.
//!
//! The generator signals that period `N` was re-rendered by creating
//! `<archive>.renew` next to the archive in the archive root. The watcher
//! forwards create events from the root (non-recursively) to a dedicated
//! thread that runs [`Pipeline::handle_trigger`] for each of them.
//!
//! Triggers that already exist at startup are not replayed; the bulk load
//! has already read the current archives.

use std::path::Path;
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::ingest::Pipeline;

/// Keeps the watcher alive; dropping it stops event delivery, which ends
/// the worker thread.
pub struct WatchHandle {
    watcher: RecommendedWatcher,
    thread: JoinHandle<()>,
}

impl WatchHandle {
    /// Stops watching and waits for the worker to drain.
    pub fn stop(self) {
        let Self { watcher, thread } = self;
        drop(watcher);
        if thread.join().is_err() {
            error!("watch thread panicked");
        }
    }
}

/// Starts watching the pipeline's archive root.
pub fn spawn(pipeline: Pipeline) -> anyhow::Result<WatchHandle> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher =
        notify::recommended_watcher(tx).context("Failed to create filesystem watcher")?;
    watcher
        .watch(pipeline.root(), RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", pipeline.root().display()))?;

    let root = pipeline.root().to_path_buf();
    let thread = std::thread::Builder::new()
        .name("archive-watch".to_string())
        .spawn(move || run_loop(&pipeline, rx))
        .context("Failed to spawn watch thread")?;

    info!(root = %root.display(), "watching for reload triggers");
    Ok(WatchHandle { watcher, thread })
}

/// Processes watch events until the stream ends.
pub fn run_loop(pipeline: &Pipeline, events: impl IntoIterator<Item = notify::Result<Event>>) {
    for event in events {
        match event {
            Ok(event) => handle_event(pipeline, &event),
            Err(e) => warn!(error = %e, "watch error"),
        }
    }
    debug!("watch event stream closed");
}

fn handle_event(pipeline: &Pipeline, event: &Event) {
    if !matches!(event.kind, EventKind::Create(_)) {
        return;
    }
    for path in &event.paths {
        handle_path(pipeline, path);
    }
}

fn handle_path(pipeline: &Pipeline, path: &Path) {
    match pipeline.handle_trigger(path) {
        Ok(Some(period)) => info!(period, trigger = %path.display(), "reload trigger handled"),
        Ok(None) => {}
        Err(IngestError::ArchiveOpen { path: archive, source }) => warn!(
            trigger = %path.display(),
            archive = %archive.display(),
            error = %source,
            "reload trigger without archive, left in place"
        ),
        Err(e) => error!(trigger = %path.display(), error = %e, "reload trigger rejected"),
    }
}
