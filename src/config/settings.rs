use std::env;
use std::time::Duration;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::constants::DEFAULT_RETRY_COUNT;
use crate::constants::DEFAULT_RETRY_DELAY_MS;
use crate::constants::DEFAULT_THROTTLE_TIME_MS;
use crate::constants::ENV_PREFIX;
use crate::constants::SETTINGS_PATH_ENV;
use crate::stream::Teardown;
use crate::Error;
use crate::Result;

/// Behaviour of the service itself.
///
/// Distinct from [`LiveDocConfig`](super::LiveDocConfig), which lists the
/// servers and the documents each of them manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDocSettings {
    /// Location of the JSON server list
    #[serde(default)]
    pub config_path: Option<String>,

    /// Keep sockets open after their last document subscription closes, until
    /// all sockets are closed explicitly
    #[serde(default)]
    pub keep_ws_open: bool,

    /// Throttle emissions on every document stream
    #[serde(default = "default_throttle")]
    pub throttle: bool,

    /// Throttle window (unit: milliseconds). The latest value inside a window
    /// is emitted when the window ends.
    #[serde(default = "default_throttle_time_ms")]
    pub throttle_time_ms: u64,

    /// Consecutive failures forgiven per document stream. Negative retries
    /// forever.
    #[serde(default = "default_retry_count")]
    pub retry_count: i64,

    /// Delay before resubscribing after a failure (unit: milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// How long an unobserved stream keeps its upstream (unit: milliseconds).
    /// 0 defers the release to the next runtime tick.
    #[serde(default)]
    pub teardown_delay_ms: u64,
}

impl Default for LiveDocSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            keep_ws_open: false,
            throttle: default_throttle(),
            throttle_time_ms: default_throttle_time_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            teardown_delay_ms: 0,
        }
    }
}

impl LiveDocSettings {
    /// Load settings from multiple sources with priority:
    /// 1. Default values
    /// 2. File passed in `path`
    /// 3. File named by `LIVEDOC_SETTINGS_PATH`
    /// 4. Environment variables prefixed `LIVEDOC__` (highest priority)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        if let Ok(path) = env::var(SETTINGS_PATH_ENV) {
            debug!(%path, "Loading settings overlay");
            builder = builder.add_source(File::with_name(&path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.throttle && self.throttle_time_ms == 0 {
            return Err(Error::InvalidSettings(
                "throttle_time_ms must be positive when throttling is enabled".to_string(),
            ));
        }
        if matches!(&self.config_path, Some(path) if path.trim().is_empty()) {
            return Err(Error::InvalidSettings("config_path must not be blank".to_string()));
        }
        Ok(())
    }

    /// Throttle window, when throttling is enabled
    pub fn throttle_window(&self) -> Option<Duration> {
        self.throttle.then(|| Duration::from_millis(self.throttle_time_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Teardown policy of document streams
    pub fn stream_teardown(&self) -> Teardown {
        Teardown::Deferred(Duration::from_millis(self.teardown_delay_ms))
    }

    /// Teardown policy of server connections
    pub fn connection_teardown(&self) -> Teardown {
        if self.keep_ws_open {
            Teardown::Never
        } else {
            self.stream_teardown()
        }
    }
}

fn default_throttle() -> bool {
    true
}
fn default_throttle_time_ms() -> u64 {
    DEFAULT_THROTTLE_TIME_MS
}
fn default_retry_count() -> i64 {
    DEFAULT_RETRY_COUNT
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
