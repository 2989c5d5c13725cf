use std::sync::Arc;

use dashmap::DashMap;
use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::merge::merged;
use super::DocumentReconstructor;
use super::LiveDocServiceBuilder;
use super::MergeStrategy;
use crate::cache::simple_hash;
use crate::cache::Lock;
use crate::cache::SimpleCache;
use crate::constants::REPLAY_BUFFER_SIZE;
use crate::stream::retry_reset;
use crate::stream::source_fn;
use crate::stream::throttle;
use crate::stream::SharedStream;
use crate::transport::MessageFrame;
use crate::transport::StompHeaders;
use crate::utils::Signal;
use crate::CallCenter;
use crate::CallCenterSlot;
use crate::CallCenterStats;
use crate::ConfigLoader;
use crate::DialContext;
use crate::Dialer;
use crate::DialerState;
use crate::Error;
use crate::LiveDocConfig;
use crate::LiveDocSettings;
use crate::Result;
use crate::StateFeed;
use crate::StateTally;
use crate::TransportError;

/// Object form of [`LiveDocService::get_stream`]
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub document: String,
    pub headers: Option<StompHeaders>,
    pub merge: Option<MergeStrategy>,
    /// Skip both caches and build a fresh subscription
    pub bypass_cache: bool,
}

impl StreamRequest {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            ..Default::default()
        }
    }
}

/// Object form of [`LiveDocService::send`]
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    /// Empty or absent: every connected server
    pub destination: Option<String>,
    pub headers: Option<StompHeaders>,
    pub body: Option<String>,
}

/// Structural key of a subscription
#[derive(Serialize)]
struct DocumentKey<'a> {
    document: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<&'a StompHeaders>,
}

/// Live documents reconstructed from STOMP servers.
///
/// Each distinct `(document, headers, merge strategy)` request maps to one
/// shared stream; callers asking twice get the same stream back. Streams
/// reconnect transparently after transient failures and hand out the latest
/// document to late subscribers.
///
/// Cloning the service shares its caches and connections.
#[derive(Clone)]
pub struct LiveDocService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    settings: LiveDocSettings,
    call_center: Arc<watch::Sender<CallCenterSlot>>,
    state_feed: StateFeed,
    close_signal: Signal,
    /// Raw subscriptions, keyed by `(document, headers)` hash
    partial_streams: DashMap<String, SharedStream<Value>>,
    /// Fully wrapped streams, locked by `(document, headers)` hash and merge
    /// strategy
    full_streams: Mutex<SimpleCache<SharedStream<Value>, u64>>,
    config_task: JoinHandle<()>,
    _config_loader: Arc<dyn ConfigLoader>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        self.config_task.abort();
    }
}

impl LiveDocService {
    pub fn builder() -> LiveDocServiceBuilder {
        LiveDocServiceBuilder::new()
    }

    /// Starts following the configuration. Must be called from within a tokio
    /// runtime.
    pub(crate) fn start(
        settings: LiveDocSettings,
        config_loader: Arc<dyn ConfigLoader>,
        dial: DialContext,
    ) -> Self {
        let (call_center, _) = watch::channel(CallCenterSlot::Pending);
        let call_center = Arc::new(call_center);

        let config_task = tokio::spawn(follow_configuration(
            config_loader.load(),
            Arc::clone(&call_center),
            dial.clone(),
        ));

        Self {
            inner: Arc::new(ServiceInner {
                settings,
                call_center,
                state_feed: dial.state_feed,
                close_signal: dial.close_signal,
                partial_streams: DashMap::new(),
                full_streams: Mutex::new(SimpleCache::new()),
                config_task,
                _config_loader: config_loader,
            }),
        }
    }

    pub fn settings(&self) -> &LiveDocSettings {
        &self.inner.settings
    }

    /// Call center built from the latest configuration, if any
    pub fn call_center(&self) -> Option<Arc<CallCenter>> {
        match &*self.inner.call_center.borrow() {
            CallCenterSlot::Ready(call_center) => Some(Arc::clone(call_center)),
            _ => None,
        }
    }

    /// Shared stream of the live document.
    ///
    /// Fails only when the request cannot be turned into a cache key; routing,
    /// transport and patch failures surface as stream errors.
    pub fn get_stream(
        &self,
        document: &str,
        headers: Option<StompHeaders>,
        merge: Option<MergeStrategy>,
        bypass_cache: bool,
    ) -> Result<SharedStream<Value>> {
        self.get_stream_with(StreamRequest {
            document: document.to_string(),
            headers,
            merge,
            bypass_cache,
        })
    }

    pub fn get_stream_with(
        &self,
        request: StreamRequest,
    ) -> Result<SharedStream<Value>> {
        let key_hash = simple_hash(&DocumentKey {
            document: &request.document,
            headers: request.headers.as_ref(),
        })?;
        let pass = request.merge.as_ref().map(MergeStrategy::id);

        let mut full_streams = self.inner.full_streams.lock();
        let mut partial = None;
        if !request.bypass_cache {
            if let Some(full) = full_streams.lookup(&key_hash, pass) {
                debug!(document = %request.document, "Full stream cache hit");
                return Ok(full.clone());
            }
            partial = self
                .inner
                .partial_streams
                .get(&key_hash)
                .map(|entry| entry.value().clone());
        }

        let partial = match partial {
            Some(partial) => {
                debug!(document = %request.document, "Reusing document subscription");
                partial
            }
            None => {
                debug!(document = %request.document, bypass = request.bypass_cache, "Creating document subscription");
                let partial = self.partial_stream(&request);
                self.inner.partial_streams.insert(key_hash.clone(), partial.clone());
                partial
            }
        };

        let full = self.full_stream(partial, request.merge);
        full_streams.blind_add(full.clone(), Lock::new(key_hash, pass));
        Ok(full)
    }

    /// Raw subscription: follows the latest call center and reconstructs the
    /// document from patches
    fn partial_stream(
        &self,
        request: &StreamRequest,
    ) -> SharedStream<Value> {
        let slots = self.inner.call_center.subscribe();
        let document = request.document.clone();
        let headers = request.headers.clone().unwrap_or_default();

        SharedStream::new(
            source_fn(move || document_stream(slots.clone(), document.clone(), headers.clone())),
            REPLAY_BUFFER_SIZE,
            self.inner.settings.stream_teardown(),
        )
    }

    /// Merge, retry, throttle and close handling over a raw subscription
    fn full_stream(
        &self,
        partial: SharedStream<Value>,
        merge: Option<MergeStrategy>,
    ) -> SharedStream<Value> {
        let upstream = source_fn(move || {
            let documents = partial.subscribe();
            match &merge {
                Some(strategy) => merged(documents, strategy.clone()).boxed(),
                None => documents.boxed(),
            }
        });

        let settings = self.inner.settings.clone();
        let close = self.inner.close_signal.clone();
        SharedStream::new(
            source_fn(move || {
                let retried = retry_reset(Arc::clone(&upstream), settings.retry_count, settings.retry_delay());
                let shaped = match settings.throttle_window() {
                    Some(window) => throttle(retried, window).boxed(),
                    None => retried.boxed(),
                };
                shaped.take_until(close.next_tick()).boxed()
            }),
            REPLAY_BUFFER_SIZE,
            self.inner.settings.stream_teardown(),
        )
    }

    /// Sends a frame. An empty destination goes to every connected server;
    /// otherwise only to the responsible server, when it is connected.
    /// Dropped while no configuration is available.
    pub fn send(
        &self,
        destination: &str,
        headers: Option<&StompHeaders>,
        body: &str,
    ) {
        let Some(call_center) = self.call_center() else {
            debug!(%destination, "No configuration yet; message dropped");
            return;
        };

        let headers = headers.cloned().unwrap_or_default();
        let dialers: Vec<Arc<Dialer>> = if destination.is_empty() {
            call_center.dialers().to_vec()
        } else {
            call_center.find_server_dialer(destination).cloned().into_iter().collect()
        };

        let delivered = dialers
            .iter()
            .filter(|dialer| dialer.send(destination, &headers, body))
            .count();
        debug!(%destination, delivered, "Message sent");
    }

    pub fn send_request(
        &self,
        request: SendRequest,
    ) {
        self.send(
            request.destination.as_deref().unwrap_or_default(),
            request.headers.as_ref(),
            request.body.as_deref().unwrap_or_default(),
        );
    }

    /// Connection statistics, re-emitted only when a field changes.
    ///
    /// Recomputed on every configuration change and after every single
    /// dialer transition. Never fails: a failed configuration reads as no
    /// servers.
    pub fn connection_statistics(&self) -> BoxStream<'static, CallCenterStats> {
        let mut last: Option<CallCenterStats> = None;
        self.observe_health(move |health| {
            let stats = match health {
                Health::Ready(tally) => tally.statistics(),
                Health::Failed => CallCenterStats::default(),
            };
            if last == Some(stats) {
                return None;
            }
            last = Some(stats);
            Some(stats)
        })
    }

    /// State of the server responsible for `document`; `None` when no
    /// server is.
    ///
    /// Once the state reaches `Error` it is held until the server is
    /// connected again, then only changes are emitted.
    pub fn get_connection_status(
        &self,
        document: &str,
    ) -> BoxStream<'static, Option<DialerState>> {
        let document = document.to_string();
        let mut last: Option<Option<DialerState>> = None;
        self.observe_health(move |health| {
            let status = match health {
                Health::Ready(tally) => tally
                    .call_center()
                    .find_server_dialer(&document)
                    .and_then(|dialer| tally.state_of(dialer.id())),
                Health::Failed => None,
            };
            let status = match last {
                Some(Some(DialerState::Error)) if status != Some(DialerState::Connected) => Some(DialerState::Error),
                _ => status,
            };
            if last == Some(status) {
                return None;
            }
            last = Some(status);
            Some(status)
        })
    }

    /// Feeds `project` the latest call center health after every
    /// configuration change and every dialer event, in order, and yields
    /// what it returns. Nothing is projected before the first configuration.
    fn observe_health<T, F>(
        &self,
        mut project: F,
    ) -> BoxStream<'static, T>
    where
        T: Send + 'static,
        F: FnMut(Health<'_>) -> Option<T> + Send + 'static,
    {
        // Events first: anything the snapshot misses is still queued
        let mut events = self.inner.state_feed.subscribe();
        let mut slots = self.inner.call_center.subscribe();

        async_stream::stream! {
            let mut tally: Option<StateTally> = None;
            let mut failed = false;
            let mut resync = true;
            let mut dirty = false;
            loop {
                if resync {
                    resync = false;
                    dirty = true;
                    let slot = slots.borrow_and_update().clone();
                    failed = matches!(slot, CallCenterSlot::Failed(_));
                    tally = match slot {
                        CallCenterSlot::Ready(call_center) => Some(StateTally::snapshot(call_center)),
                        _ => None,
                    };
                }

                if dirty {
                    dirty = false;
                    let projected = match &tally {
                        Some(tally) => project(Health::Ready(tally)),
                        None if failed => project(Health::Failed),
                        None => None,
                    };
                    if let Some(item) = projected {
                        yield item;
                    }
                }

                tokio::select! {
                    changed = slots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        resync = true;
                    }
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Some(tally) = tally.as_mut() {
                                dirty = tally.apply(event);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Dialer state changes skipped; resynchronizing");
                            resync = true;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }
        .boxed()
    }

    /// Closes every open socket and ends every document stream, cancelling
    /// pending retries
    pub fn close_all_sockets(&self) {
        info!("Closing all sockets");
        self.inner.close_signal.notify();
    }
}

async fn follow_configuration(
    mut configs: BoxStream<'static, Result<LiveDocConfig>>,
    slot: Arc<watch::Sender<CallCenterSlot>>,
    dial: DialContext,
) {
    while let Some(config) = configs.next().await {
        match config {
            Ok(config) => {
                info!(servers = config.servers.len(), "Configuration received; rebuilding call center");
                let call_center = CallCenter::prepare(config, dial.clone());
                slot.send_replace(CallCenterSlot::Ready(Arc::new(call_center)));
            }
            Err(e) => {
                error!(error = %e, "Failed to load configuration");
                slot.send_replace(CallCenterSlot::Failed(e));
                return;
            }
        }
    }
    debug!("Configuration stream ended");
}

/// What health observers get to see
enum Health<'a> {
    Ready(&'a StateTally),
    /// The configuration stream failed
    Failed,
}

enum Step {
    CallCenter { alive: bool },
    Item(Option<Result<Value>>),
}

enum Event {
    Connected,
    ConnectionFailed(Error),
    ConnectionClosed,
    Frame(MessageFrame),
    Unsubscribed,
}

async fn next_or_pending<T>(stream: &mut Option<BoxStream<'static, T>>) -> Option<T> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Follows the latest call center and switches to a fresh document
/// subscription whenever it is rebuilt
fn document_stream(
    mut slots: watch::Receiver<CallCenterSlot>,
    document: String,
    headers: StompHeaders,
) -> BoxStream<'static, Result<Value>> {
    async_stream::stream! {
        let mut current: Option<BoxStream<'static, Result<Value>>> = None;
        let mut rebuild = true;
        loop {
            if rebuild {
                rebuild = false;
                let slot = slots.borrow_and_update().clone();
                current = match slot {
                    CallCenterSlot::Pending => {
                        debug!(%document, "Waiting for configuration");
                        None
                    }
                    CallCenterSlot::Ready(call_center) => {
                        Some(open_document(call_center, document.clone(), headers.clone()))
                    }
                    CallCenterSlot::Failed(e) => {
                        yield Err(e);
                        break;
                    }
                };
            }

            let step = tokio::select! {
                changed = slots.changed() => Step::CallCenter { alive: changed.is_ok() },
                item = next_or_pending(&mut current) => Step::Item(item),
            };

            match step {
                Step::CallCenter { alive: true } => rebuild = true,
                Step::CallCenter { alive: false } => break,
                Step::Item(Some(Ok(value))) => {
                    yield Ok(value);
                }
                Step::Item(Some(Err(e))) => {
                    yield Err(e);
                    break;
                }
                // Subscription over; the next configuration reopens it
                Step::Item(None) => current = None,
            }
        }
    }
    .boxed()
}

/// Routes `document`, waits for the server connection and reconstructs the
/// document from its frames
fn open_document(
    call_center: Arc<CallCenter>,
    document: String,
    headers: StompHeaders,
) -> BoxStream<'static, Result<Value>> {
    let dialer = match call_center.resolve(&document) {
        Ok(dialer) => dialer,
        Err(e) => return stream::once(async move { Err(e) }).boxed(),
    };
    let mut connection = dialer.connection().subscribe();

    async_stream::stream! {
        let mut frames: Option<BoxStream<'static, MessageFrame>> = None;
        let mut reconstructor = DocumentReconstructor::new(&document);

        loop {
            let event = tokio::select! {
                connected = connection.next() => match connected {
                    Some(Ok(_)) => Event::Connected,
                    Some(Err(e)) => Event::ConnectionFailed(e),
                    None => Event::ConnectionClosed,
                },
                frame = next_or_pending(&mut frames) => match frame {
                    Some(frame) => Event::Frame(frame),
                    None => Event::Unsubscribed,
                },
            };

            match event {
                Event::Connected => {
                    let Some(client) = dialer.client() else {
                        yield Err(TransportError::ConnectionLost {
                            uri: dialer.server().uri.clone(),
                            message: "no transport handle".to_string(),
                        }
                        .into());
                        break;
                    };
                    debug!(%document, server = %dialer.server().label(), "Subscribing to document");
                    frames = Some(client.subscribe(&document, &headers));
                }
                Event::ConnectionFailed(e) => {
                    yield Err(e);
                    break;
                }
                Event::ConnectionClosed => break,
                Event::Frame(frame) => match reconstructor.apply(&frame.body) {
                    Ok(value) => {
                        yield Ok(value);
                    }
                    Err(e) => {
                        warn!(%document, error = %e, "Dropping document after bad patch");
                        yield Err(e);
                        break;
                    }
                },
                Event::Unsubscribed => frames = None,
            }
        }
    }
    .boxed()
}
