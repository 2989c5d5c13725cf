use std::sync::Arc;

use tracing::info;

use super::LiveDocService;
use crate::transport::Connector;
use crate::utils::Signal;
use crate::AuthToken;
use crate::ConfigLoader;
use crate::ConfigLoaderService;
use crate::DialContext;
use crate::Error;
use crate::LiveDocSettings;
use crate::Result;
use crate::StateFeed;

pub struct LiveDocServiceBuilder {
    settings: LiveDocSettings,
    config_loader: Option<Arc<dyn ConfigLoader>>,
    connector: Option<Arc<dyn Connector>>,
    auth_token: Option<AuthToken>,
}

impl Default for LiveDocServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveDocServiceBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            settings: LiveDocSettings::default(),
            config_loader: None,
            connector: None,
            auth_token: None,
        }
    }

    /// Completely replaces the default settings
    pub fn settings(
        mut self,
        settings: LiveDocSettings,
    ) -> Self {
        self.settings = settings;
        self
    }

    /// Source of the server list (default: [`ConfigLoaderService`] reading
    /// `config_path`)
    pub fn config_loader(
        mut self,
        config_loader: Arc<dyn ConfigLoader>,
    ) -> Self {
        self.config_loader = Some(config_loader);
        self
    }

    /// Opens transport handles. Required.
    pub fn connector(
        mut self,
        connector: Arc<dyn Connector>,
    ) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Token sent to secure servers right after the handshake
    pub fn auth_token(
        mut self,
        auth_token: AuthToken,
    ) -> Self {
        self.auth_token = Some(auth_token);
        self
    }

    /// Build the service and start following the configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<LiveDocService> {
        self.settings.validate()?;

        let connector = self
            .connector
            .ok_or_else(|| Error::InvalidSettings("a transport connector is required".to_string()))?;
        let config_loader = match self.config_loader {
            Some(config_loader) => config_loader,
            None => Arc::new(ConfigLoaderService::from_settings(&self.settings)?),
        };

        let dial = DialContext {
            connector,
            auth_token: self.auth_token,
            state_feed: StateFeed::new(),
            close_signal: Signal::new(),
            teardown: self.settings.connection_teardown(),
        };

        info!(
            keep_ws_open = self.settings.keep_ws_open,
            throttle = self.settings.throttle,
            retry_count = self.settings.retry_count,
            "Starting LiveDoc service"
        );
        Ok(LiveDocService::start(self.settings, config_loader, dial))
    }
}
