// Settings defaults
pub(crate) const DEFAULT_THROTTLE_TIME_MS: u64 = 300;
pub(crate) const DEFAULT_RETRY_COUNT: i64 = 10;
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

// Settings sources
pub(crate) const ENV_PREFIX: &str = "LIVEDOC";
pub(crate) const SETTINGS_PATH_ENV: &str = "LIVEDOC_SETTINGS_PATH";

/// Destination an auth token is sent to right after the handshake
pub(crate) const AUTH_TOKEN_DESTINATION: &str = "";

/// Replay depth of every shared document and connection stream
pub(crate) const REPLAY_BUFFER_SIZE: usize = 1;

/// Buffered server list updates per config subscriber
pub(crate) const CONFIG_UPDATE_CAPACITY: usize = 16;

/// Buffered dialer state changes per observer
pub(crate) const STATE_EVENT_CAPACITY: usize = 256;
