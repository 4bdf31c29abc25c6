//! Configuration File Watcher
//!
//! Watches the configuration search paths and refreshes the live environment
//! when an application document changes.

use crate::environment::FilePropertySourceLocator;
use crate::refresh::ContextRefresher;
use crate::Result;
use anyhow::Context;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// What started a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "path", rename_all = "snake_case")]
pub enum RefreshTrigger {
    FileChanged(PathBuf),
    Manual,
}

/// Result of a successful refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub keys: BTreeSet<String>,
    pub trigger: RefreshTrigger,
    pub timestamp: SystemTime,
}

/// Configuration file watcher
pub struct ConfigWatcher {
    refresher: Arc<ContextRefresher>,
    outcome_sender: broadcast::Sender<RefreshOutcome>,
    watched: Vec<PathBuf>,
    worker: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching the locator's search paths
    ///
    /// Must be called from within a Tokio runtime. Directories that do not
    /// exist are skipped.
    pub fn new(
        refresher: Arc<ContextRefresher>,
        locator: FilePropertySourceLocator,
        debounce: Duration,
    ) -> Result<Self> {
        let (outcome_sender, _) = broadcast::channel(100);
        let (event_sender, event_receiver) = mpsc::unbounded_channel::<PathBuf>();

        let filter = locator.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(path) = Self::relevant_path(&event, &filter) {
                        // The receiver only goes away when the watcher is dropped.
                        let _ = event_sender.send(path);
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
            NotifyConfig::default(),
        )
        .context("Failed to create file watcher")?;

        let mut watched = Vec::new();
        for dir in locator.search_paths() {
            if !dir.is_dir() {
                warn!("Configuration directory does not exist, not watching: {}", dir.display());
                continue;
            }
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch directory: {}", dir.display()))?;
            info!("Started watching configuration directory: {}", dir.display());
            watched.push(dir.clone());
        }

        let worker = tokio::spawn(Self::debounce_loop(
            event_receiver,
            refresher.clone(),
            outcome_sender.clone(),
            debounce,
        ));

        Ok(Self {
            refresher,
            outcome_sender,
            watched,
            worker,
            _watcher: watcher,
        })
    }

    /// Subscribe to refresh outcomes
    pub fn subscribe(&self) -> BroadcastStream<RefreshOutcome> {
        BroadcastStream::new(self.outcome_sender.subscribe())
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Force a refresh now
    pub async fn trigger(&self) -> Result<BTreeSet<String>> {
        info!("Forcing configuration refresh");
        run_refresh(&self.refresher, &self.outcome_sender, RefreshTrigger::Manual).await
    }

    fn relevant_path(event: &Event, locator: &FilePropertySourceLocator) -> Option<PathBuf> {
        debug!("File event: {:?}", event);

        let path = event.paths.iter().find(|path| locator.matches(path))?;
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => Some(path.clone()),
            EventKind::Remove(_) => {
                warn!("Configuration file was removed, keeping its properties: {}", path.display());
                None
            }
            _ => None,
        }
    }

    /// Collapse bursts of events into one refresh per quiet period
    async fn debounce_loop(
        mut events: mpsc::UnboundedReceiver<PathBuf>,
        refresher: Arc<ContextRefresher>,
        sender: broadcast::Sender<RefreshOutcome>,
        debounce: Duration,
    ) {
        while let Some(mut path) = events.recv().await {
            while let Ok(Some(next)) = tokio::time::timeout(debounce, events.recv()).await {
                path = next;
            }

            info!("Configuration file changed, refreshing: {}", path.display());
            // Failures are logged by run_refresh; keep watching.
            let _ = run_refresh(&refresher, &sender, RefreshTrigger::FileChanged(path)).await;
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_refresh(
    refresher: &Arc<ContextRefresher>,
    sender: &broadcast::Sender<RefreshOutcome>,
    trigger: RefreshTrigger,
) -> Result<BTreeSet<String>> {
    let task_refresher = refresher.clone();
    let result = tokio::task::spawn_blocking(move || task_refresher.refresh())
        .await
        .context("Refresh task failed to complete")
        .and_then(|result| result);

    match result {
        Ok(keys) => {
            let outcome = RefreshOutcome {
                keys: keys.clone(),
                trigger,
                timestamp: SystemTime::now(),
            };
            if let Err(e) = sender.send(outcome) {
                debug!("No subscribers for refresh outcome: {}", e);
            }
            info!(keys = ?keys, "Configuration refreshed");
            Ok(keys)
        }
        Err(e) => {
            error!("Failed to refresh configuration, keeping current properties: {:#}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::{ConfigBootstrap, RefreshScope};
    use crate::environment::Environment;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::sleep;
    use tokio_stream::StreamExt;

    fn setup(dir: &TempDir) -> (Arc<ContextRefresher>, FilePropertySourceLocator) {
        let locator = FilePropertySourceLocator::new(vec![dir.path().to_path_buf()], "application");
        let refresher = Arc::new(ContextRefresher::new(
            Arc::new(Environment::new()),
            Arc::new(RefreshScope::new()),
            ConfigBootstrap::new().with_locator(Arc::new(locator.clone())),
        ));
        (refresher, locator)
    }

    #[tokio::test]
    async fn test_manual_trigger_broadcasts_outcome() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("application.toml"), "greeting = \"hello\"\n").unwrap();

        let (refresher, locator) = setup(&dir);
        let watcher = ConfigWatcher::new(refresher.clone(), locator, Duration::from_millis(50)).unwrap();
        let mut outcomes = watcher.subscribe();

        let keys = watcher.trigger().await.unwrap();
        assert_eq!(keys, ["greeting".to_string()].into());

        let outcome = outcomes.next().await.unwrap().unwrap();
        assert_eq!(outcome.trigger, RefreshTrigger::Manual);
        assert_eq!(watcher.watched_paths(), &[dir.path().to_path_buf()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_change_triggers_refresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("application.toml");
        fs::write(&path, "limit = 1\n").unwrap();

        let (refresher, locator) = setup(&dir);
        refresher.refresh_environment().unwrap();

        let watcher = ConfigWatcher::new(refresher.clone(), locator, Duration::from_millis(50)).unwrap();
        let mut outcomes = watcher.subscribe();

        fs::write(&path, "limit = 2\n").unwrap();

        tokio::select! {
            outcome = outcomes.next() => {
                let outcome = outcome.unwrap().unwrap();
                assert!(outcome.keys.contains("limit"));
                assert!(matches!(outcome.trigger, RefreshTrigger::FileChanged(_)));
            }
            _ = sleep(Duration::from_secs(5)) => {
                panic!("Refresh outcome not received within timeout");
            }
        }
        assert_eq!(
            refresher.environment().get_property("limit"),
            Some(serde_json::json!(2))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_document_keeps_current_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("application.toml");
        fs::write(&path, "limit = 1\n").unwrap();

        let (refresher, locator) = setup(&dir);
        refresher.refresh_environment().unwrap();

        let watcher = ConfigWatcher::new(refresher.clone(), locator, Duration::from_millis(50)).unwrap();
        let mut outcomes = watcher.subscribe();

        fs::write(&path, "invalid toml content [[[").unwrap();
        sleep(Duration::from_millis(500)).await;

        assert_eq!(
            refresher.environment().get_property("limit"),
            Some(serde_json::json!(1))
        );

        tokio::select! {
            _ = outcomes.next() => {
                panic!("No outcome should be emitted for an invalid document");
            }
            _ = sleep(Duration::from_millis(200)) => {}
        }
    }
}
