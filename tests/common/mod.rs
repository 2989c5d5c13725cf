//! In-memory brokers standing in for STOMP servers

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use livedoc::transport::ConnectionEvent;
use livedoc::transport::Connector;
use livedoc::transport::MessageFrame;
use livedoc::transport::StompClient;
use livedoc::transport::StompFrame;
use livedoc::transport::StompHeaders;
use livedoc::transport::TransportOptions;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for integration test.");
}

pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached in time");
}

/// One server: frames sent to a destination reach every subscriber of it
#[derive(Default)]
pub struct Broker {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<MessageFrame>)>>,
    connections: Mutex<usize>,
}

impl Broker {
    pub fn publish(
        &self,
        destination: &str,
        headers: &StompHeaders,
        body: &str,
    ) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (d, tx) in subscribers.iter() {
            if d == destination {
                let _ = tx.send(MessageFrame {
                    destination: destination.to_string(),
                    headers: headers.clone(),
                    body: body.to_string(),
                });
            }
        }
    }

    pub fn subscriptions(
        &self,
        destination: &str,
    ) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|(d, tx)| d == destination && !tx.is_closed())
            .count()
    }

    /// Currently open connections
    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

/// Brokers by URI
#[derive(Default)]
pub struct Network {
    brokers: Mutex<HashMap<String, Arc<Broker>>>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broker(
        &self,
        uri: &str,
    ) -> Arc<Broker> {
        Arc::clone(self.brokers.lock().entry(uri.to_string()).or_default())
    }
}

impl Connector for Network {
    fn open(
        &self,
        uri: &str,
        _options: &TransportOptions,
    ) -> Arc<dyn StompClient> {
        let broker = self.broker(uri);
        *broker.connections.lock() += 1;
        Arc::new(BrokerClient {
            broker,
            open: AtomicBool::new(true),
        })
    }
}

struct BrokerClient {
    broker: Arc<Broker>,
    open: AtomicBool,
}

impl StompClient for BrokerClient {
    fn connect(
        &self,
        _headers: &StompHeaders,
    ) -> BoxStream<'static, ConnectionEvent> {
        let connected = ConnectionEvent::Connected(StompFrame::connected(StompHeaders::new()));
        futures::stream::once(async move { connected })
            .chain(futures::stream::pending())
            .boxed()
    }

    fn disconnect(&self) -> livedoc::Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            *self.broker.connections.lock() -= 1;
        }
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
        if !destination.is_empty() {
            self.broker.publish(destination, headers, body);
        }
    }

    fn subscribe(
        &self,
        destination: &str,
        _headers: &StompHeaders,
    ) -> BoxStream<'static, MessageFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.broker.subscribers.lock().push((destination.to_string(), tx));
        UnboundedReceiverStream::new(rx).boxed()
    }
}
