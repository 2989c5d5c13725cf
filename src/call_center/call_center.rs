use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::CallCenterEvent;
use super::DialContext;
use super::Dialer;
use super::DialerState;
use crate::Error;
use crate::LiveDocConfig;
use crate::Result;

/// Connection state counts across all servers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CallCenterStats {
    /// All servers, whatever their state
    pub total: usize,
    pub disconnected: usize,
    pub connecting: usize,
    pub connected: usize,
    pub error: usize,
    /// Requests for documents no server is responsible for
    pub server_not_found_error_count: usize,
}

impl CallCenterStats {
    pub(crate) fn count(
        &mut self,
        state: DialerState,
    ) {
        match state {
            DialerState::Disconnected => self.disconnected += 1,
            DialerState::Connecting => self.connecting += 1,
            DialerState::Connected => self.connected += 1,
            DialerState::Error => self.error += 1,
        }
    }
}

/// Connections with every configured server
///
/// Holds one [`Dialer`] per server, in declaration order. A new configuration
/// produces a new call center; dialers are never migrated between them.
#[derive(Debug)]
pub struct CallCenter {
    configuration: LiveDocConfig,
    server_not_found_error_count: AtomicUsize,
    dialers: Vec<Arc<Dialer>>,
    context: DialContext,
}

impl CallCenter {
    pub(crate) fn prepare(
        configuration: LiveDocConfig,
        context: DialContext,
    ) -> Self {
        let dialers = configuration
            .servers
            .iter()
            .map(|server| Arc::new(Dialer::new(server.clone(), context.clone())))
            .collect::<Vec<_>>();

        let defaults = configuration.servers.iter().filter(|server| server.default).count();
        if defaults > 1 {
            warn!(defaults, "Several default servers configured; the first one wins");
        }
        debug!(servers = dialers.len(), "Call center prepared");

        Self {
            configuration,
            server_not_found_error_count: AtomicUsize::new(0),
            dialers,
            context,
        }
    }

    pub fn configuration(&self) -> &LiveDocConfig {
        &self.configuration
    }

    pub fn dialers(&self) -> &[Arc<Dialer>] {
        &self.dialers
    }

    /// Dialer of the server responsible for `document`.
    ///
    /// The first server whose prefixes claim the document wins; otherwise the
    /// first server marked default.
    pub fn find_server_dialer(
        &self,
        document: &str,
    ) -> Option<&Arc<Dialer>> {
        self.dialers
            .iter()
            .find(|dialer| dialer.server().matches(document))
            .or_else(|| self.dialers.iter().find(|dialer| dialer.server().default))
    }

    /// Like [`find_server_dialer`](Self::find_server_dialer), but counts a
    /// miss and turns it into an error
    pub(crate) fn resolve(
        &self,
        document: &str,
    ) -> Result<Arc<Dialer>> {
        match self.find_server_dialer(document) {
            Some(dialer) => Ok(Arc::clone(dialer)),
            None => {
                let count = self.server_not_found_error_count.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(%document, count, "Cannot find LiveDoc server for document");
                self.context
                    .state_feed
                    .publish(CallCenterEvent::ServerNotFound { count });
                Err(Error::ServerNotFound {
                    document: document.to_string(),
                })
            }
        }
    }

    pub fn server_not_found_error_count(&self) -> usize {
        self.server_not_found_error_count.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> CallCenterStats {
        let mut stats = CallCenterStats {
            total: self.dialers.len(),
            server_not_found_error_count: self.server_not_found_error_count(),
            ..Default::default()
        };
        for dialer in &self.dialers {
            stats.count(dialer.state());
        }
        stats
    }
}

/// Latest outcome of the configuration stream
#[derive(Debug, Clone)]
pub(crate) enum CallCenterSlot {
    /// No configuration yet
    Pending,
    Ready(Arc<CallCenter>),
    /// The configuration stream failed
    Failed(Error),
}
