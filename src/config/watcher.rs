//! Config file watcher.
//!
//! Editors save in bursts (truncate, write, rename, chmod), each of which
//! raises its own notify event. Events are coalesced: the file is re-read
//! once it has been quiet for the debounce period, and a new config is only
//! emitted when the contents actually changed.

use crate::config::loader::parse_config;
use crate::config::schema::DaemonConfig;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

/// Keeps the OS watcher and the forwarding task alive.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Parsed and validated configs arrive on the receiver;
    /// rejected files are logged and skipped.
    pub fn run(self) -> Result<(WatchHandle, mpsc::UnboundedReceiver<DaemonConfig>), notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward_changes(self.path.clone(), self.debounce, event_rx, update_tx));

        tracing::info!(path = %self.path.display(), debounce_ms = self.debounce.as_millis() as u64, "Config watcher started");
        Ok((
            WatchHandle {
                _watcher: watcher,
                task,
            },
            update_rx,
        ))
    }
}

/// Wait for the next burst of events to settle. Returns how many events it
/// held, or `None` once the event source is gone.
async fn next_burst(events: &mut mpsc::UnboundedReceiver<()>, quiet: Duration) -> Option<usize> {
    events.recv().await?;
    let mut count = 1;
    loop {
        match time::timeout(quiet, events.recv()).await {
            Ok(Some(())) => count += 1,
            Ok(None) | Err(_) => return Some(count),
        }
    }
}

async fn forward_changes(
    path: PathBuf,
    quiet: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<DaemonConfig>,
) {
    let mut last = tokio::fs::read_to_string(&path).await.ok();

    while let Some(coalesced) = next_burst(&mut events, quiet).await {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Config file unreadable; keeping current configuration");
                continue;
            }
        };
        if last.as_deref() == Some(content.as_str()) {
            tracing::debug!(events = coalesced, "Config file touched without changes");
            continue;
        }
        last = Some(content.clone());

        tracing::info!(events = coalesced, "Config file changed, reloading");
        match parse_config(&content) {
            Ok(config) => {
                if updates.send(config).is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!(error = %e, "Rejected config file; keeping current configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_GROUP: &str = r#"
[[host_groups]]
name = "ssh"
hosts = ["10.0.0.1"]
check_type = "tcp"
port = 22
"#;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let quiet = Duration::from_millis(500);
        let start = time::Instant::now();

        tokio::spawn(async move {
            for _ in 0..4 {
                let _ = tx.send(());
                time::sleep(Duration::from_millis(100)).await;
            }
            time::sleep(Duration::from_secs(5)).await;
        });

        assert_eq!(next_burst(&mut rx, quiet).await, Some(4));
        assert!(start.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_only_changed_contents_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkd.toml");
        std::fs::write(&path, "").unwrap();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (update_tx, mut updates) = mpsc::unbounded_channel();
        tokio::spawn(forward_changes(path.clone(), Duration::from_millis(50), event_rx, update_tx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Touch without a change: nothing is emitted.
        event_tx.send(()).unwrap();
        assert!(time::timeout(Duration::from_millis(300), updates.recv()).await.is_err());

        // One save, many events: one config.
        std::fs::write(&path, ONE_GROUP).unwrap();
        for _ in 0..5 {
            event_tx.send(()).unwrap();
        }
        let config = time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.host_groups.len(), 1);
        assert!(time::timeout(Duration::from_millis(300), updates.recv()).await.is_err());

        // An invalid file is skipped.
        std::fs::write(&path, "[[host_groups]]\nname = \"\"\nhosts = []\n").unwrap();
        event_tx.send(()).unwrap();
        assert!(time::timeout(Duration::from_millis(300), updates.recv()).await.is_err());
    }
}
