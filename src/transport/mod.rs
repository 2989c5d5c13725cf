//! STOMP transport seam
//!
//! The service never talks to sockets directly. A [`Connector`] opens one
//! transport handle per connection attempt, and the handle speaks STOMP
//! through the [`StompClient`] trait. Frames are surfaced as streams so the
//! rest of the pipeline can compose them like any other source.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// STOMP header map. Ordered, so headers take part in structural keys
/// deterministically.
pub type StompHeaders = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connected,
    Message,
    Receipt,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    pub headers: StompHeaders,
    pub body: String,
}

impl StompFrame {
    pub fn connected(headers: StompHeaders) -> Self {
        Self {
            command: StompCommand::Connected,
            headers,
            body: String::new(),
        }
    }
}

/// MESSAGE frame delivered to a destination subscription. For document
/// destinations the body is a JSON Patch array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub destination: String,
    pub headers: StompHeaders,
    pub body: String,
}

/// Outcome of a STOMP handshake, as reported by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// CONNECTED frame received
    Connected(StompFrame),
    /// ERROR frame or socket failure, rendered as text
    Error(String),
}

/// Fallback transports a handle may use when a plain WebSocket is not
/// available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Websocket,
    XdrStreaming,
    XhrStreaming,
    IframeEventsource,
    IframeHtmlfile,
    XdrPolling,
    XhrPolling,
    IframeXhrPolling,
    JsonpPolling,
}

impl fmt::Display for TransportKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            TransportKind::Websocket => "websocket",
            TransportKind::XdrStreaming => "xdr-streaming",
            TransportKind::XhrStreaming => "xhr-streaming",
            TransportKind::IframeEventsource => "iframe-eventsource",
            TransportKind::IframeHtmlfile => "iframe-htmlfile",
            TransportKind::XdrPolling => "xdr-polling",
            TransportKind::XhrPolling => "xhr-polling",
            TransportKind::IframeXhrPolling => "iframe-xhr-polling",
            TransportKind::JsonpPolling => "jsonp-polling",
        };
        f.write_str(name)
    }
}

/// Options handed to [`Connector::open`]. `None` leaves the choice to the
/// transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub transports: Option<Vec<TransportKind>>,
}

/// One open transport handle speaking STOMP
#[cfg_attr(test, automock)]
pub trait StompClient: Send + Sync + 'static {
    /// Starts the STOMP handshake. The stream reports the CONNECTED frame or
    /// the failure, and ends when the socket closes.
    fn connect(
        &self,
        headers: &StompHeaders,
    ) -> BoxStream<'static, ConnectionEvent>;

    /// Sends DISCONNECT and closes the socket
    fn disconnect(&self) -> Result<()>;

    /// Whether the socket is still open or opening
    fn is_open(&self) -> bool;

    fn send(
        &self,
        destination: &str,
        headers: &StompHeaders,
        body: &str,
    );

    /// Subscribes to a destination. Dropping the stream unsubscribes.
    fn subscribe(
        &self,
        destination: &str,
        headers: &StompHeaders,
    ) -> BoxStream<'static, MessageFrame>;
}

/// Opens transport handles
#[cfg_attr(test, automock)]
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        uri: &str,
        options: &TransportOptions,
    ) -> Arc<dyn StompClient>;
}
