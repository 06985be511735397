//! Connection management and message dispatch.
//!
//! A [`Connection`] owns the transport. Callers submit requests through
//! [`invoke`](Connection::invoke) and drive inbound traffic by running
//! [`read_loop`](Connection::read_loop) in a background task; the loop frames
//! raw reads into messages, resolves replies against the correlation engine,
//! and fans notifications out to listeners. Per-line and per-notification
//! failures are logged and dropped; they never abort the loop.

use crate::correlation::{Admission, CorrelationEngine, MAX_INFLIGHT_REQUESTS};
use crate::error::ClientError;
use crate::stream::HubStream;
use hublink_protocol::codec::{Encoder, LineDecoder};
use hublink_protocol::message::{Request, RpcMessage, RpcNotification};
use hublink_protocol::notification::{decode_notification, Notification};
use hublink_protocol::DEFAULT_BAUD_RATE;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Serial device path.
    pub path: String,
    /// Baud rate for the serial port.
    pub baud_rate: u32,
    /// Per-request deadline. On expiry the identifier is freed and the
    /// caller gets [`ClientError::Timeout`].
    pub request_timeout: Duration,
    /// Bound on concurrently in-flight requests.
    pub max_inflight: usize,
    /// Buffer size for transport reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_inflight: MAX_INFLIGHT_REQUESTS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }
}

type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;
type ListenerRegistry = Arc<parking_lot::Mutex<Vec<(u64, Listener)>>>;

/// Removes its listener from the connection when asked to.
///
/// Dropping the handle without calling [`unsubscribe`](Self::unsubscribe)
/// leaves the listener registered for the connection's lifetime.
pub struct Subscription {
    id: u64,
    listeners: Weak<parking_lot::Mutex<Vec<(u64, Listener)>>>,
}

impl Subscription {
    /// Deregisters the listener.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// A connection to a hub.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream (for sending requests).
    writer: Mutex<Option<WriteHalf<HubStream>>>,
    /// Read half of the stream (for the read loop).
    reader: Mutex<Option<ReadHalf<HubStream>>>,
    /// Framing decoder for inbound data.
    decoder: Mutex<LineDecoder>,
    /// Pending and queued request state.
    engine: Mutex<CorrelationEngine>,
    /// Notification listeners, in registration order.
    listeners: ListenerRegistry,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    /// Opens the serial device named in `config`.
    pub fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        let stream = HubStream::open_serial(&config.path, config.baud_rate)?;
        Ok(Self::from_stream(stream, config))
    }

    /// Builds a connection over an already-open stream. Used by tests,
    /// simulations, and alternative transports.
    pub fn from_stream(stream: HubStream, config: ConnectionConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            engine: Mutex::new(CorrelationEngine::new(config.max_inflight)),
            config,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            decoder: Mutex::new(LineDecoder::new()),
            listeners: Arc::new(parking_lot::Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Registers a notification listener.
    ///
    /// Listeners run in registration order, synchronously within the read
    /// loop, for every decoded notification. A panicking listener is logged
    /// and does not stop later listeners.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Submits a request and waits for its matching reply.
    ///
    /// Admission is FIFO under the configured in-flight cap; the reply may
    /// arrive in any order relative to other requests, so completion order is
    /// not FIFO. Requests still unanswered at the deadline are abandoned and
    /// their identifier freed.
    pub async fn invoke(&self, request: Request) -> Result<Value, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        let admission = self.engine.lock().await.submit(request, tx);
        let id = match admission {
            Admission::Transmit(request) => {
                let id = request.id.clone();
                if let Err(err) = self.transmit(&request).await {
                    tracing::debug!("transmit failed for request {}: {}", id, err);
                    drop(self.engine.lock().await.abort(&id));
                    self.drain_queue().await;
                    return Err(err);
                }
                id
            }
            Admission::Queued(id) => id,
        };

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                tracing::debug!("request {} hit its deadline", id);
                drop(self.engine.lock().await.abort(&id));
                // expiry freed an in-flight slot
                self.drain_queue().await;
                Err(ClientError::Timeout)
            }
        }
    }

    /// Writes a request without registering it for a reply.
    ///
    /// Some device commands answer only through notifications; this is the
    /// fire-and-forget path for those.
    pub async fn send(&self, request: &Request) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        self.transmit(request).await
    }

    /// Reads and dispatches inbound messages until the transport ends.
    ///
    /// Run this in a background task. It returns `Err` on EOF or a fatal read
    /// error, after rejecting every request still pending at that point.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            let read = {
                let mut reader = self.reader.lock().await;
                let reader = reader.as_mut().ok_or(ClientError::ConnectionClosed)?;
                reader.read(&mut buf).await
            };
            let n = match read {
                Ok(0) => {
                    tracing::debug!("transport ended");
                    self.shutdown_pending().await;
                    return Err(ClientError::ConnectionClosed);
                }
                Ok(n) => n,
                Err(err) => {
                    tracing::debug!("transport read failed: {}", err);
                    self.shutdown_pending().await;
                    return Err(ClientError::Io(err));
                }
            };

            self.decoder.lock().await.extend(&buf[..n]);
            loop {
                let decoded = self.decoder.lock().await.decode_message();
                match decoded {
                    Ok(Some(message)) => self.dispatch(message).await,
                    Ok(None) => break,
                    Err(err) => tracing::warn!("dropping undecodable line: {}", err),
                }
            }
        }
    }

    /// Closes the transport and rejects every pending and queued request.
    ///
    /// The read loop, if running, observes the closure through EOF or its
    /// next read error; abort its task to reclaim it earlier. The serial port
    /// itself is released when the connection is dropped.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shutdown_pending().await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests transmitted but not yet resolved.
    pub async fn in_flight(&self) -> usize {
        self.engine.lock().await.in_flight()
    }

    /// Number of requests awaiting admission.
    pub async fn queued(&self) -> usize {
        self.engine.lock().await.queued()
    }

    async fn transmit(&self, request: &Request) -> Result<(), ClientError> {
        let line = Encoder::encode_request(request)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientError::ConnectionClosed)?;
        writer.write_all(&line).await.map_err(ClientError::Io)?;
        Ok(())
    }

    async fn dispatch(&self, message: RpcMessage) {
        match message {
            RpcMessage::Response { id, result } => self.complete(&id, Ok(result)).await,
            RpcMessage::Error { id, message } => {
                self.complete(&id, Err(ClientError::Hub(message))).await;
            }
            RpcMessage::Notification(notification) => self.dispatch_notification(&notification),
            RpcMessage::Request(request) => {
                tracing::warn!(
                    "ignoring device-initiated request {} ({})",
                    request.id,
                    request.method
                );
            }
        }
    }

    /// Resolves the pending request matching `id`, then lets the queue
    /// advance into the freed slot.
    async fn complete(&self, id: &str, outcome: Result<Value, ClientError>) {
        let slot = self.engine.lock().await.complete(id);
        match slot {
            Some(slot) => {
                // the caller may have given up at its deadline already
                let _ = slot.send(outcome);
                self.drain_queue().await;
            }
            None => tracing::warn!("dropping reply with no pending request: {}", id),
        }
    }

    /// Admits and transmits queued requests until the queue is empty or the
    /// cap is reached again. A failed transmit rejects that request alone and
    /// keeps draining.
    async fn drain_queue(&self) {
        loop {
            let Some(request) = self.engine.lock().await.admit_next() else {
                break;
            };
            if let Err(err) = self.transmit(&request).await {
                tracing::warn!("failed to transmit queued request {}: {}", request.id, err);
                if let Some(slot) = self.engine.lock().await.abort(&request.id) {
                    let _ = slot.send(Err(err));
                }
            }
        }
    }

    fn dispatch_notification(&self, raw: &RpcNotification) {
        let notification = match decode_notification(raw) {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!("dropping undecodable notification ({}): {}", raw.method, err);
                return;
            }
        };
        // snapshot so listeners can subscribe/unsubscribe without deadlock
        let listeners: Vec<(u64, Listener)> = self.listeners.lock().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&notification))).is_err() {
                tracing::warn!("notification listener {} panicked", id);
            }
        }
    }

    async fn shutdown_pending(&self) {
        let slots = self.engine.lock().await.reject_all();
        if !slots.is_empty() {
            tracing::debug!("rejecting {} unresolved requests", slots.len());
        }
        for slot in slots {
            let _ = slot.send(Err(ClientError::ConnectionClosed));
        }
    }
}
