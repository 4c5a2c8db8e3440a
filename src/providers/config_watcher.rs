use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    event::{Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Configuration file monitoring service provider.
///
/// Watches the directory of the configuration file (editors often replace
/// the file instead of writing it in place) and publishes
/// [`AppEvent::SettingsChanged`] once a burst of modifications settles.
///
/// - **Priority**: 6 (medium)
/// - **Critical**: No (optional service)
pub struct ConfigWatcherServiceProvider {
    config_path: PathBuf,
    event_bus: EventBus,
}

impl ConfigWatcherServiceProvider {
    pub fn new(config_path: PathBuf, event_bus: EventBus) -> Self {
        Self {
            config_path,
            event_bus,
        }
    }
}

#[async_trait]
impl ServiceProvider for ConfigWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let config_path = self.config_path.clone();
        let event_bus = self.event_bus.clone();

        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_config_watcher_service(config_path, event_bus, cancel_token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ConfigWatcherService"
    }

    fn priority(&self) -> i32 {
        6
    }
}

/// Forwards notify callbacks into the async task.
#[derive(Debug)]
struct AsyncEventHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for AsyncEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to send filesystem event to async handler: {e}");
        }
    }
}

async fn run_config_watcher_service(
    config_path: PathBuf,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Config watcher started for: {}", config_path.display());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(AsyncEventHandler { sender: event_tx })?;

    let watch_path = config_path
        .parent()
        .map_or_else(|| config_path.clone(), |parent| parent.to_path_buf());
    watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
    debug!("Watching directory: {}", watch_path.display());

    let mut pending_since: Option<tokio::time::Instant> = None;

    loop {
        let deadline = pending_since.map(|since| since + DEBOUNCE);
        let debounce = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Config watcher service cancelled");
                break;
            }

            event_result = event_rx.recv() => {
                match event_result {
                    Some(Ok(event)) => {
                        let affects_config = event
                            .paths
                            .iter()
                            .any(|path| path == &config_path || path.file_name() == config_path.file_name());

                        if affects_config && (event.kind.is_modify() || event.kind.is_create()) {
                            debug!("Config file event: {:?}", event.kind);
                            pending_since = Some(tokio::time::Instant::now());
                        }
                    }
                    Some(Err(e)) => warn!("Filesystem watcher error: {e}"),
                    None => {
                        warn!("Filesystem event channel closed, exiting");
                        break;
                    }
                }
            }

            () = debounce => {
                pending_since = None;
                if config_path.exists() {
                    info!("Configuration file changed");
                    if let Err(e) = event_bus.publish(AppEvent::SettingsChanged) {
                        error!("Failed to publish settings change: {e}");
                    }
                } else {
                    warn!("Configuration file {} no longer exists", config_path.display());
                }
            }
        }
    }

    if let Err(e) = watcher.unwatch(&watch_path) {
        warn!("Failed to unwatch path during cleanup: {e}");
    }

    info!("Config watcher service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    fn config_dir() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "version: 1\n").unwrap();
        (dir, path)
    }

    #[test]
    fn provider_metadata() {
        let provider = ConfigWatcherServiceProvider::new(PathBuf::from("/tmp/x.yml"), EventBus::new());
        assert_eq!(provider.name(), "ConfigWatcherService");
        assert_eq!(provider.priority(), 6);
        assert!(!provider.is_critical());
    }

    #[tokio::test]
    async fn file_change_publishes_settings_changed() {
        let (_dir, path) = config_dir();
        let event_bus = EventBus::new();
        let mut event_rx = event_bus.subscribe();

        let provider = ConfigWatcherServiceProvider::new(path.clone(), event_bus);
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        std::fs::write(&path, "version: 1\nsettings:\n  checkinterval: 5\n").unwrap();

        let event = timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .expect("no settings change published")
            .unwrap();
        assert_eq!(event, AppEvent::SettingsChanged);

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn rapid_changes_are_debounced() {
        let (_dir, path) = config_dir();
        let event_bus = EventBus::new();
        let mut event_rx = event_bus.subscribe();

        let provider = ConfigWatcherServiceProvider::new(path.clone(), event_bus);
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        for i in 0..5 {
            std::fs::write(&path, format!("# change {i}\nversion: 1\n")).unwrap();
            sleep(Duration::from_millis(50)).await;
        }

        let mut event_count = 0;
        while let Ok(Ok(_)) = timeout(Duration::from_millis(1500), event_rx.recv()).await {
            event_count += 1;
        }
        assert_eq!(event_count, 1);

        task_manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn unrelated_file_is_ignored() {
        let (dir, path) = config_dir();
        let event_bus = EventBus::new();
        let mut event_rx = event_bus.subscribe();

        let provider = ConfigWatcherServiceProvider::new(path, event_bus);
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        std::fs::write(dir.path().join("other.txt"), "noise").unwrap();
        assert!(timeout(Duration::from_millis(1200), event_rx.recv()).await.is_err());

        task_manager.shutdown_all().await.unwrap();
    }
}
