//! Filesystem watcher for the `MAILTESTER_KEYS_JSON_PATH` config file. When
//! the file changes, the desired key set is re-parsed and handed to the
//! `ConfigReconciler` for re-sync — the watcher itself never touches the
//! Key Store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::reconcile::ConfigReconciler;

/// Watches `path` for writes and re-syncs `reconciler` on every change,
/// parsing the file the same way `config::load_key_preload` parses
/// `MAILTESTER_KEYS_JSON_PATH` at startup.
///
/// Consumes nothing it doesn't own and spawns a long-running task; call once
/// at startup after the initial sync has already run.
pub fn watch_key_file(path: PathBuf, reconciler: std::sync::Arc<ConfigReconciler>) -> notify::Result<()> {
    let (tx, mut rx) = mpsc::channel::<std::result::Result<Event, notify::Error>>(16);

    // notify's callback runs on its own thread; forward events onto a tokio
    // channel so the handler can run on the async executor.
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
    )?;

    let watch_dir = path.parent().unwrap_or_else(|| Path::new("."));
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching key preload file for changes");

    tokio::spawn(async move {
        let _watcher = watcher; // keep alive for the life of this task

        while let Some(event_res) = rx.recv().await {
            match event_res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                        && event.paths.iter().any(|p| p == &path)
                    {
                        handle_change(&path, &reconciler).await;
                    }
                }
                Err(err) => warn!(error = %err, "key preload file watcher error"),
            }
        }
    });

    Ok(())
}

async fn handle_change(path: &Path, reconciler: &ConfigReconciler) {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read key preload file after change");
            return;
        }
    };

    #[derive(serde::Deserialize)]
    struct Entry {
        #[serde(alias = "subscriptionId")]
        id: String,
        plan: String,
    }

    let entries: Vec<Entry> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "key preload file has invalid JSON, skipping re-sync");
            return;
        }
    };

    let desired: Vec<(String, String)> = entries.into_iter().map(|e| (e.id, e.plan)).collect();
    if let Err(err) = reconciler.sync(&desired).await {
        warn!(error = %err, "config re-sync failed after file change");
    }
}
