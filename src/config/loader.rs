use std::path::Path;
use std::path::PathBuf;

use futures::stream::BoxStream;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::LiveDocConfig;
use super::LiveDocSettings;
use crate::constants::CONFIG_UPDATE_CAPACITY;
use crate::Error;
use crate::Result;

/// Supplies the server list: the initial configuration, then every
/// replacement. The service rebuilds its connection pool on each emission.
#[cfg_attr(test, automock)]
pub trait ConfigLoader: Send + Sync + 'static {
    fn load(&self) -> BoxStream<'static, Result<LiveDocConfig>>;
}

/// Reads the server list from a JSON file, then follows configurations
/// pushed through [`ConfigLoaderService::new_config`].
#[derive(Debug, Clone)]
pub struct ConfigLoaderService {
    path: PathBuf,
    updates: broadcast::Sender<LiveDocConfig>,
}

impl ConfigLoaderService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (updates, _) = broadcast::channel(CONFIG_UPDATE_CAPACITY);
        Self {
            path: path.into(),
            updates,
        }
    }

    pub fn from_settings(settings: &LiveDocSettings) -> Result<Self> {
        match settings.config_path.as_deref() {
            Some(path) => Ok(Self::new(path)),
            None => Err(Error::InvalidSettings(
                "config_path is required unless a config loader is supplied".to_string(),
            )),
        }
    }

    /// Replaces the configuration for every current subscriber
    pub fn new_config(
        &self,
        config: LiveDocConfig,
    ) {
        if self.updates.send(config).is_err() {
            debug!("No subscriber for configuration update");
        }
    }
}

impl ConfigLoader for ConfigLoaderService {
    fn load(&self) -> BoxStream<'static, Result<LiveDocConfig>> {
        let path = self.path.clone();
        // Subscribe before reading so no update is lost in between
        let mut updates = self.updates.subscribe();

        async_stream::stream! {
            match read_config(&path).await {
                Ok(config) => {
                    info!(path = %path.display(), servers = config.servers.len(), "Loaded LiveDoc configuration");
                    yield Ok(config);
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            loop {
                match updates.recv().await {
                    Ok(config) => yield Ok(config),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Configuration updates skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }
}

async fn read_config(path: &Path) -> Result<LiveDocConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::ConfigLoad(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| Error::ConfigLoad(format!("{}: {e}", path.display())))
}

/// In-memory server list
#[derive(Debug)]
pub struct StaticConfigLoader {
    config: watch::Sender<LiveDocConfig>,
}

impl StaticConfigLoader {
    pub fn new(config: LiveDocConfig) -> Self {
        let (tx, _) = watch::channel(config);
        Self { config: tx }
    }

    pub fn replace(
        &self,
        config: LiveDocConfig,
    ) {
        self.config.send_replace(config);
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> BoxStream<'static, Result<LiveDocConfig>> {
        WatchStream::new(self.config.subscribe()).map(Ok).boxed()
    }
}
