use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CallCenterEvent;
use super::StateFeed;
use crate::constants::AUTH_TOKEN_DESTINATION;
use crate::constants::REPLAY_BUFFER_SIZE;
use crate::stream::source_fn;
use crate::stream::SharedStream;
use crate::stream::Teardown;
use crate::transport::ConnectionEvent;
use crate::transport::Connector;
use crate::transport::StompClient;
use crate::transport::StompFrame;
use crate::transport::StompHeaders;
use crate::utils::Signal;
use crate::Result;
use crate::ServerConfig;
use crate::TransportError;

/// Connection state of one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DialerState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Latest auth token; `None` until one is available
pub type AuthToken = watch::Receiver<Option<String>>;

/// Everything a dialer needs to open connections, shared by all dialers of
/// the service
#[derive(Clone)]
pub(crate) struct DialContext {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) auth_token: Option<AuthToken>,
    /// Carries every dialer state change, in order
    pub(crate) state_feed: StateFeed,
    /// Fires on `close_all_sockets`
    pub(crate) close_signal: Signal,
    pub(crate) teardown: Teardown,
}

impl fmt::Debug for DialContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DialContext")
            .field("auth_token", &self.auth_token.is_some())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

static NEXT_DIALER_ID: AtomicU64 = AtomicU64::new(1);

/// Manages the connection with one server.
///
/// State only changes through [`Dialer::transition`], which publishes the
/// change on the shared state feed so statistics recompute.
pub struct Dialer {
    id: u64,
    server: ServerConfig,
    /// Current state and the feed sequence number of the change that set it
    state: Mutex<(DialerState, u64)>,
    client: Mutex<Option<Arc<dyn StompClient>>>,
    connection: Mutex<Option<SharedStream<StompFrame>>>,
    context: DialContext,
}

impl fmt::Debug for Dialer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("server", &self.server.label())
            .field("state", &self.state())
            .finish()
    }
}

impl Dialer {
    pub(crate) fn new(
        server: ServerConfig,
        context: DialContext,
    ) -> Self {
        Self {
            id: NEXT_DIALER_ID.fetch_add(1, Ordering::Relaxed),
            server,
            state: Mutex::new((DialerState::Disconnected, 0)),
            client: Mutex::new(None),
            connection: Mutex::new(None),
            context,
        }
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Process-unique id, as carried by [`CallCenterEvent::Transition`]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> DialerState {
        self.state.lock().0
    }

    pub(crate) fn versioned_state(&self) -> (DialerState, u64) {
        *self.state.lock()
    }

    /// Transport handle of the latest connection attempt
    pub fn client(&self) -> Option<Arc<dyn StompClient>> {
        self.client.lock().clone()
    }

    pub(crate) fn transition(
        &self,
        state: DialerState,
    ) {
        let feed = &self.context.state_feed;
        let mut current = self.state.lock();
        let previous = current.0;
        let seq = feed.next_seq();
        *current = (state, seq);
        // Published under the lock so events of one dialer keep their order
        feed.publish(CallCenterEvent::Transition {
            dialer: self.id,
            seq,
            state,
        });
        drop(current);
        debug!(server = %self.server.label(), ?previous, ?state, "Dialer state changed");
    }

    /// Sends over the current transport, only while connected. Returns
    /// whether the frame went out.
    pub(crate) fn send(
        &self,
        destination: &str,
        headers: &StompHeaders,
        body: &str,
    ) -> bool {
        if self.state() != DialerState::Connected {
            return false;
        }
        match self.client() {
            Some(client) => {
                client.send(destination, headers, body);
                true
            }
            None => false,
        }
    }

    /// Shared stream of CONNECTED frames.
    ///
    /// Created once per dialer. The first subscriber opens a transport and
    /// starts the handshake; once nobody listens the transport is closed
    /// according to the teardown policy. A handshake or socket failure ends
    /// the stream with an error.
    pub(crate) fn connection(self: &Arc<Self>) -> SharedStream<StompFrame> {
        let mut slot = self.connection.lock();
        if let Some(connection) = slot.as_ref() {
            return connection.clone();
        }

        let dialer = Arc::downgrade(self);
        let connection = SharedStream::new(
            source_fn(move || match dialer.upgrade() {
                Some(dialer) => dialer.handshake(),
                None => stream::empty().boxed(),
            }),
            REPLAY_BUFFER_SIZE,
            self.context.teardown,
        );
        *slot = Some(connection.clone());
        connection
    }

    fn handshake(self: Arc<Self>) -> BoxStream<'static, Result<StompFrame>> {
        let close = self.context.close_signal.next_tick();
        let dialer = self;

        async_stream::stream! {
            dialer.transition(DialerState::Connecting);
            let uri = dialer.server.uri.clone();
            info!(server = %dialer.server.label(), %uri, "Opening connection");

            let client = dialer.context.connector.open(&uri, &dialer.server.transport_options());
            *dialer.client.lock() = Some(Arc::clone(&client));
            let _guard = ConnectionGuard {
                dialer: Arc::clone(&dialer),
                client: Arc::clone(&client),
            };

            let mut events = client.connect(&dialer.server.headers);
            let mut token = if dialer.server.secure {
                dialer.context.auth_token.clone()
            } else {
                None
            };
            let mut connected = false;
            // CONNECTED frame held back until the first token went out
            let mut gated: Option<StompFrame> = None;

            loop {
                let step = tokio::select! {
                    event = events.next() => Step::Event(event),
                    update = next_token(&mut token) => Step::Token(update),
                };

                match step {
                    Step::Event(Some(ConnectionEvent::Connected(frame))) => {
                        connected = true;
                        dialer.transition(DialerState::Connected);
                        let current = token.as_mut().map(|rx| rx.borrow_and_update().clone());
                        match current {
                            None => {
                                yield Ok(frame);
                            }
                            Some(Some(value)) => {
                                client.send(AUTH_TOKEN_DESTINATION, &StompHeaders::new(), &value);
                                yield Ok(frame);
                            }
                            Some(None) => {
                                debug!(%uri, "Waiting for auth token");
                                gated = Some(frame);
                            }
                        }
                    }
                    Step::Event(Some(ConnectionEvent::Error(message))) => {
                        dialer.transition(DialerState::Error);
                        warn!(%uri, %message, "Connection failed");
                        let error = if connected {
                            TransportError::ConnectionLost { uri, message }
                        } else {
                            TransportError::HandshakeFailed { uri, message }
                        };
                        yield Err(error.into());
                        break;
                    }
                    Step::Event(None) => {
                        dialer.transition(DialerState::Error);
                        warn!(%uri, "Socket closed");
                        yield Err(TransportError::ConnectionLost {
                            uri,
                            message: "socket closed".to_string(),
                        }
                        .into());
                        break;
                    }
                    Step::Token(Some(Some(value))) => {
                        if connected {
                            client.send(AUTH_TOKEN_DESTINATION, &StompHeaders::new(), &value);
                        }
                        if let Some(frame) = gated.take() {
                            yield Ok(frame);
                        }
                    }
                    Step::Token(Some(None)) => {}
                    Step::Token(None) => {
                        token = None;
                        if gated.is_some() {
                            yield Err(TransportError::HandshakeFailed {
                                uri,
                                message: "auth token source closed before a token was available".to_string(),
                            }
                            .into());
                            break;
                        }
                    }
                }
            }
        }
        .take_until(close)
        .boxed()
    }
}

enum Step {
    Event(Option<ConnectionEvent>),
    /// `None` once the token source is gone
    Token(Option<Option<String>>),
}

async fn next_token(token: &mut Option<AuthToken>) -> Option<Option<String>> {
    match token {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Closes the transport when the connection stream is torn down
struct ConnectionGuard {
    dialer: Arc<Dialer>,
    client: Arc<dyn StompClient>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open = self.client.is_open();
        debug!(server = %self.dialer.server.label(), open, "Tearing down connection");
        if !open {
            return;
        }
        match self.client.disconnect() {
            Ok(()) => self.dialer.transition(DialerState::Disconnected),
            Err(e) => warn!(server = %self.dialer.server.label(), error = %e, "Failed to disconnect"),
        }
    }
}
