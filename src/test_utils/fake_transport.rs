//! In-memory STOMP transport driven from tests

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::transport::ConnectionEvent;
use crate::transport::Connector;
use crate::transport::MessageFrame;
use crate::transport::StompClient;
use crate::transport::StompFrame;
use crate::transport::StompHeaders;
use crate::transport::TransportOptions;
use crate::Result;
use crate::TransportError;

/// Opens [`FakeClient`]s and remembers every one of them
pub struct FakeConnector {
    auto_connect: bool,
    clients: Mutex<Vec<(TransportOptions, Arc<FakeClient>)>>,
}

impl FakeConnector {
    /// Handshakes succeed as soon as they start
    pub fn new() -> Self {
        Self {
            auto_connect: true,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Handshakes wait for [`FakeClient::emit`]
    pub fn manual() -> Self {
        Self {
            auto_connect: false,
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Most recent client opened for `uri`
    pub fn client(
        &self,
        uri: &str,
    ) -> Option<Arc<FakeClient>> {
        self.clients
            .lock()
            .iter()
            .rev()
            .find(|(_, client)| client.uri == uri)
            .map(|(_, client)| Arc::clone(client))
    }

    /// Options the most recent client for `uri` was opened with
    pub fn options(
        &self,
        uri: &str,
    ) -> Option<TransportOptions> {
        self.clients
            .lock()
            .iter()
            .rev()
            .find(|(_, client)| client.uri == uri)
            .map(|(options, _)| options.clone())
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        uri: &str,
        options: &TransportOptions,
    ) -> Arc<dyn StompClient> {
        let client = Arc::new(FakeClient::new(uri, self.auto_connect));
        self.clients.lock().push((options.clone(), Arc::clone(&client)));
        client
    }
}

type Subscriber = (String, StompHeaders, mpsc::UnboundedSender<MessageFrame>);

pub struct FakeClient {
    uri: String,
    auto_connect: bool,
    open: AtomicBool,
    fail_disconnect: AtomicBool,
    disconnects: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<ConnectionEvent>>>,
    connect_headers: Mutex<Option<StompHeaders>>,
    subscribers: Mutex<Vec<Subscriber>>,
    sent: Mutex<Vec<(String, StompHeaders, String)>>,
}

impl FakeClient {
    fn new(
        uri: &str,
        auto_connect: bool,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            auto_connect,
            open: AtomicBool::new(true),
            fail_disconnect: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            events: Mutex::new(None),
            connect_headers: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Reports a handshake outcome
    pub fn emit(
        &self,
        event: ConnectionEvent,
    ) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn accept(&self) {
        self.emit(ConnectionEvent::Connected(connected_frame()));
    }

    /// Socket failure: the socket closes, then the error is reported
    pub fn fail(
        &self,
        message: &str,
    ) {
        self.open.store(false, Ordering::SeqCst);
        self.emit(ConnectionEvent::Error(message.to_string()));
    }

    /// Delivers a MESSAGE frame to every live subscription of `destination`.
    /// Returns the number of receivers.
    pub fn publish(
        &self,
        destination: &str,
        body: &str,
    ) -> usize {
        let mut delivered = 0;
        for (d, headers, tx) in self.subscribers.lock().iter() {
            let frame = MessageFrame {
                destination: destination.to_string(),
                headers: headers.clone(),
                body: body.to_string(),
            };
            if d == destination && tx.send(frame).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn publish_patch(
        &self,
        destination: &str,
        patch: Value,
    ) -> usize {
        self.publish(destination, &patch.to_string())
    }

    /// Subscriptions to `destination` whose stream is still held
    pub fn active_subscriptions(
        &self,
        destination: &str,
    ) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|(d, _, tx)| d == destination && !tx.is_closed())
            .count()
    }

    /// Headers of every subscription made to `destination`
    pub fn subscription_headers(
        &self,
        destination: &str,
    ) -> Vec<StompHeaders> {
        self.subscribers
            .lock()
            .iter()
            .filter(|(d, _, _)| d == destination)
            .map(|(_, headers, _)| headers.clone())
            .collect()
    }

    pub fn connect_headers(&self) -> Option<StompHeaders> {
        self.connect_headers.lock().clone()
    }

    pub fn sent(&self) -> Vec<(String, StompHeaders, String)> {
        self.sent.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn set_disconnect_failure(
        &self,
        fail: bool,
    ) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }
}

impl StompClient for FakeClient {
    fn connect(
        &self,
        headers: &StompHeaders,
    ) -> BoxStream<'static, ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_connect {
            let _ = tx.send(ConnectionEvent::Connected(connected_frame()));
        }
        *self.events.lock() = Some(tx);
        *self.connect_headers.lock() = Some(headers.clone());
        UnboundedReceiverStream::new(rx).boxed()
    }

    fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost {
                uri: self.uri.clone(),
                message: "disconnect refused".to_string(),
            }
            .into());
        }
        self.open.store(false, Ordering::SeqCst);
        self.events.lock().take();
        self.subscribers.lock().clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(
        &self,
        destination: &str,
        headers: &StompHeaders,
        body: &str,
    ) {
        self.sent
            .lock()
            .push((destination.to_string(), headers.clone(), body.to_string()));
    }

    fn subscribe(
        &self,
        destination: &str,
        headers: &StompHeaders,
    ) -> BoxStream<'static, MessageFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .push((destination.to_string(), headers.clone(), tx));
        UnboundedReceiverStream::new(rx).boxed()
    }
}

fn connected_frame() -> StompFrame {
    let mut headers = StompHeaders::new();
    headers.insert("version".to_string(), "1.2".to_string());
    StompFrame::connected(headers)
}
