use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::watch;

/// Republishes the configuration whenever its TOML file changes.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
    path: PathBuf,
    profile: Option<String>,
}

impl ConfigWatcher {
    /// Creates a watcher for `path` seeded with the already loaded configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(
        initial_config: AppConfig,
        path: impl Into<PathBuf>,
        profile: Option<String>,
    ) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (
            Self {
                tx,
                path: path.into(),
                profile,
            },
            rx,
        )
    }

    /// Watches the configuration file and broadcasts each successful reload.
    ///
    /// A reload that fails to parse is logged and the previous configuration
    /// stays current. Runs until the watcher or all receivers are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(self) -> Result<()> {
        let Self { tx, path, profile } = self;

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(&path, RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if !event.kind.is_modify() {
                    continue;
                }
                tracing::info!(path = %path.display(), "Config file changed, reloading...");
                match ConfigLoader::load_from(&path, profile.as_deref()) {
                    Ok(new_config) => {
                        if tx.send(new_config).is_err() {
                            tracing::debug!("No config subscribers left, stopping watcher");
                            break;
                        }
                        tracing::info!("Config reloaded successfully");
                    }
                    Err(e) => {
                        tracing::error!("Failed to reload config, keeping previous: {}", e);
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
