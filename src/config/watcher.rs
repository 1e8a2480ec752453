//! Config file watcher for hot strategy reload.
//!
//! # Design Decisions
//! - Watches the file's parent directory, so saves that replace the file by
//!   rename are seen as well as in-place writes
//! - A revision is published only when it loads, validates, and differs from
//!   the last one published (editors fire several events per save)
//! - Publishing and applying are split: `run` feeds a channel, `apply_revisions`
//!   drains it into a `MigrationOrchestrator`

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::MigrationConfig;
use crate::orchestrator::MigrationOrchestrator;

/// Publishes valid, changed revisions of one migration config file.
pub struct ConfigWatcher {
    path: PathBuf,
    current: MigrationConfig,
    updates: mpsc::UnboundedSender<MigrationConfig>,
}

impl ConfigWatcher {
    /// `current` is the revision already running; rewriting the file with the
    /// same content publishes nothing.
    pub fn new(path: &Path, current: MigrationConfig) -> (Self, mpsc::UnboundedReceiver<MigrationConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                updates,
            },
            rx,
        )
    }

    /// Start watching. Dropping the returned handle stops the watcher and
    /// closes the channel.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, current, updates } = self;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(ToOwned::to_owned);
        let publisher = Publisher {
            path: path.clone(),
            last: Mutex::new(current),
            updates,
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, file_name.as_ref()) => publisher.reload(),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Config watch error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Watching migration config");
        Ok(watcher)
    }
}

/// Apply every published revision to `orchestrator` until the channel closes.
pub async fn apply_revisions(orchestrator: &MigrationOrchestrator, mut updates: mpsc::UnboundedReceiver<MigrationConfig>) {
    while let Some(config) = updates.recv().await {
        match orchestrator.apply_config(&config) {
            Ok(applied) => tracing::info!(applied, "Migration config reloaded"),
            Err(e) => tracing::error!(error = %e, "Failed to apply reloaded config"),
        }
    }
    tracing::debug!("Config revision channel closed");
}

fn touches(event: &Event, file_name: Option<&OsString>) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == file_name.map(OsString::as_os_str))
}

struct Publisher {
    path: PathBuf,
    last: Mutex<MigrationConfig>,
    updates: mpsc::UnboundedSender<MigrationConfig>,
}

impl Publisher {
    fn reload(&self) {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Ignoring config revision, keeping current routing");
                return;
            }
        };

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == config {
            tracing::debug!(path = ?self.path, "Config unchanged");
            return;
        }
        *last = config.clone();
        let services = config.services.len();
        if self.updates.send(config).is_err() {
            tracing::debug!("Config revision dropped, no receiver");
            return;
        }
        tracing::info!(path = ?self.path, services, "Config revision published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;

    const BASE: &str = r#"
[[services]]
name = "auth"
strategy = "canary"
rules = { canary_percentage = 10.0 }

[[services.legacy]]
endpoint = "legacy-auth:8080"

[[services.new]]
endpoint = "auth-v2:8080"
"#;

    fn publisher(dir: &Path) -> (Publisher, mpsc::UnboundedReceiver<MigrationConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let publisher = Publisher {
            path: dir.join("migration.toml"),
            last: Mutex::new(parse_config(BASE).unwrap()),
            updates,
        };
        (publisher, rx)
    }

    #[test]
    fn test_publishes_only_changed_valid_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, mut rx) = publisher(dir.path());

        std::fs::write(&publisher.path, BASE).unwrap();
        publisher.reload();
        assert!(rx.try_recv().is_err());

        std::fs::write(&publisher.path, BASE.replace("10.0", "250.0")).unwrap();
        publisher.reload();
        assert!(rx.try_recv().is_err());

        std::fs::write(&publisher.path, BASE.replace("10.0", "40.0")).unwrap();
        publisher.reload();
        publisher.reload();
        let config = rx.try_recv().unwrap();
        assert_eq!(config.services[0].rules.canary_percentage, 40.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ignores_other_files_in_directory() {
        let modify = |path: &str| Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(PathBuf::from(path));
        let name = OsString::from("migration.toml");

        assert!(touches(&modify("/etc/router/migration.toml"), Some(&name)));
        assert!(!touches(&modify("/etc/router/.migration.toml.swp"), Some(&name)));
        assert!(!touches(
            &Event::new(EventKind::Remove(notify::event::RemoveKind::File)).add_path(PathBuf::from("/etc/router/migration.toml")),
            Some(&name)
        ));
    }
}
