//! File watcher for automatic row set reloading
//!
//! This module is feature-gated behind the `file-watcher` feature.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::core::ServerCore;
use crate::loader::load_dataset;

/// Watches the data file and swaps the reloaded rows into the ServerCore
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn new(core: Arc<ServerCore>, path: PathBuf, id_column: Option<String>) -> notify::Result<Self> {
        let (tx, mut rx) = mpsc::channel::<()>(100);

        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                    && event.paths.iter().any(|p| same_file(p, &watched))
                {
                    let _ = tx.blocking_send(());
                }
            }
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        info!("Watching {} for changes", path.display());

        tokio::spawn(async move {
            // Debounce: collect events for a short window
            let mut pending = false;
            let debounce_duration = Duration::from_millis(100);

            loop {
                tokio::select! {
                    received = rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                        pending = true;
                    }
                    _ = tokio::time::sleep(debounce_duration), if pending => {
                        pending = false;
                        reload(&core, &path, id_column.as_deref()).await;
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || a.file_name() == b.file_name()
}

async fn reload(core: &ServerCore, path: &Path, id_column: Option<&str>) {
    if !path.exists() {
        warn!("{} disappeared, keeping the current rows", path.display());
        return;
    }
    let dataset = match load_dataset(path, id_column).await {
        Ok(dataset) => dataset,
        Err(e) => {
            warn!("Failed to reload {}: {}", path.display(), e);
            return;
        }
    };
    match core.replace_source(dataset).await {
        Ok(report) => info!(
            "Reloaded {}, {} columns recomputed",
            path.display(),
            report.affected_columns.len()
        ),
        Err(e) => warn!("Recompute after reloading {} failed: {}", path.display(), e),
    }
}
