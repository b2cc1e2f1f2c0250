//! Cross-context messenger and its event loop.
//!
//! The messenger spawns a tokio task that handles:
//!
//! - Outgoing requests from the Rust API
//! - Request/response correlation by UUID
//! - Inbound requests from the peer: pipeline walk, listeners, reply

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{BridgeFrame, MessageData, PageAction};
use crate::transport::Channel;

use super::interceptor::Interceptor;
use super::pipeline::{InterceptorHandle, Pipeline};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// Local message listener.
///
/// Return `Some(value)` to answer a request the peer sent.
pub type MessageListener = Arc<dyn Fn(&MessageData) -> Option<Value> + Send + Sync>;

/// Listeners by event name.
type ListenerMap = FxHashMap<String, Vec<MessageListener>>;

// ============================================================================
// SendOptions
// ============================================================================

/// Options for [`Messenger::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Overrides the messenger's default timeout.
    pub timeout: Option<Duration>,
    /// Resolve with `null` instead of failing on timeout.
    pub suppress_timeout_error: bool,
    /// Wait for the peer's response.
    pub await_response: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            suppress_timeout_error: false,
            await_response: true,
        }
    }
}

impl SendOptions {
    /// Sets the timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves with `null` on timeout.
    #[inline]
    #[must_use]
    pub fn suppress_timeout_error(mut self) -> Self {
        self.suppress_timeout_error = true;
        self
    }

    /// Does not wait for a response.
    #[inline]
    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.await_response = false;
        self
    }
}

// ============================================================================
// MessengerCommand
// ============================================================================

/// Internal commands for the event loop.
enum MessengerCommand {
    /// Send a request and wait for its response.
    Send {
        frame: BridgeFrame,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    /// Send a frame without correlation.
    Post(BridgeFrame),
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Stop the event loop.
    Shutdown,
}

// ============================================================================
// Messenger
// ============================================================================

/// One side of the cross-context bridge.
///
/// Cheap to clone; every clone drives the same event loop.
///
/// # Example
///
/// ```ignore
/// let (sandbox, page) = Channel::pair();
/// let messenger = Messenger::new(sandbox);
///
/// let uuid = messenger
///     .send_message("getReactNodeData", payload, SendOptions::default())
///     .await?;
/// ```
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

struct MessengerInner {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<MessengerCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Interceptors for inbound requests.
    pipeline: Arc<Pipeline>,
    /// Local listeners (shared with delivery tasks).
    listeners: Arc<RwLock<ListenerMap>>,
    /// Timeout used when a send does not set one.
    default_timeout: Duration,
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("pending", &self.pending_count())
            .field("interceptors", &self.interceptor_count())
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}

impl Messenger {
    /// Creates a messenger over `channel` with the default 30s timeout.
    ///
    /// Spawns the event loop task internally.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self::with_default_timeout(channel, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a messenger with a custom default timeout.
    #[must_use]
    pub fn with_default_timeout(channel: Channel, default_timeout: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let pipeline = Pipeline::new();
        let listeners = Arc::new(RwLock::new(ListenerMap::default()));

        tokio::spawn(Self::run_event_loop(
            channel,
            command_rx,
            Arc::clone(&correlation),
            Arc::clone(&pipeline),
            Arc::clone(&listeners),
        ));

        Self {
            inner: Arc::new(MessengerInner {
                command_tx,
                correlation,
                pipeline,
                listeners,
                default_timeout,
            }),
        }
    }

    /// Returns a non-owning reference.
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakMessenger {
        WeakMessenger {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// ============================================================================
// Messenger - Requests
// ============================================================================

impl Messenger {
    /// Sends a message to the peer.
    ///
    /// Resolves with the peer's response payload, or `null` when
    /// `await_response` is off or the timeout error is suppressed.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the event loop has stopped
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn send_message(
        &self,
        event: impl Into<String>,
        payload: Value,
        options: SendOptions,
    ) -> Result<Value> {
        let message = MessageData::new(event, payload);

        if !options.await_response {
            let frame = BridgeFrame::request(message, false);
            trace!(id = %frame.id(), "Posting message");
            self.inner
                .command_tx
                .send(MessengerCommand::Post(frame))
                .map_err(|_| Error::ConnectionClosed)?;
            return Ok(Value::Null);
        }

        // Check pending request limit
        {
            let correlation = self.inner.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let frame = BridgeFrame::request(message, true);
        let request_id = frame.id();
        let request_timeout = options.timeout.unwrap_or(self.inner.default_timeout);

        let (response_tx, response_rx) = oneshot::channel();

        self.inner
            .command_tx
            .send(MessengerCommand::Send { frame, response_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .inner
                    .command_tx
                    .send(MessengerCommand::RemoveCorrelation(request_id));

                let timeout_ms = u64::try_from(request_timeout.as_millis()).unwrap_or(u64::MAX);

                if options.suppress_timeout_error {
                    debug!(%request_id, timeout_ms, "Request timed out, resolving null");
                    Ok(Value::Null)
                } else {
                    Err(Error::request_timeout(request_id, timeout_ms))
                }
            }
        }
    }

    /// Asks the page context to run an inspection action.
    ///
    /// # Errors
    ///
    /// Same as [`send_message`](Self::send_message).
    pub async fn run_page_action(&self, action: PageAction, request_timeout: Duration) -> Result<Value> {
        let message = action.into_message()?;
        self.send_message(
            message.event,
            message.payload,
            SendOptions::default().with_timeout(request_timeout),
        )
        .await
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlation.lock().len()
    }

    /// Stops the event loop. Pending requests fail with
    /// [`Error::ConnectionClosed`].
    pub fn shutdown(&self) {
        let _ = self.inner.command_tx.send(MessengerCommand::Shutdown);
    }
}

// ============================================================================
// Messenger - Interception
// ============================================================================

impl Messenger {
    /// Appends an interceptor to the inbound pipeline.
    pub fn add_interceptor<A: Send + 'static>(&self, interceptor: Interceptor<A>) -> InterceptorHandle {
        self.inner.pipeline.register(interceptor)
    }

    /// Returns the number of registered interceptors.
    #[inline]
    #[must_use]
    pub fn interceptor_count(&self) -> usize {
        self.inner.pipeline.len()
    }

    /// Walks the pipeline for a locally produced message.
    ///
    /// Returns the surviving message, or `None` if it was suppressed.
    pub async fn intercept(&self, message: MessageData) -> Option<MessageData> {
        self.inner.pipeline.run(message).await
    }

    /// Adds a listener for messages with `event` that survive the pipeline.
    pub fn on_message<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&MessageData) -> Option<Value> + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Removes every listener for `event`. Returns how many were removed.
    pub fn off_message(&self, event: &str) -> usize {
        self.inner
            .listeners
            .write()
            .remove(event)
            .map_or(0, |listeners| listeners.len())
    }
}

// ============================================================================
// Messenger - Event Loop
// ============================================================================

impl Messenger {
    /// Event loop that handles channel I/O.
    async fn run_event_loop(
        channel: Channel,
        mut command_rx: mpsc::UnboundedReceiver<MessengerCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        pipeline: Arc<Pipeline>,
        listeners: Arc<RwLock<ListenerMap>>,
    ) {
        let (outbound, mut inbound) = channel.into_parts();

        loop {
            tokio::select! {
                // Frames from the peer
                frame = inbound.recv() => {
                    match frame {
                        Some(BridgeFrame::Response { id, payload }) => {
                            let tx = correlation.lock().remove(&id);

                            if let Some(tx) = tx {
                                let _ = tx.send(Ok(payload));
                            } else {
                                warn!(%id, "Response for unknown request");
                            }
                        }

                        Some(BridgeFrame::Request { id, event, payload, await_response }) => {
                            tokio::spawn(Self::deliver(
                                id,
                                MessageData::new(event, payload),
                                await_response,
                                Arc::clone(&pipeline),
                                Arc::clone(&listeners),
                                outbound.clone(),
                            ));
                        }

                        None => {
                            debug!("Channel closed by peer");
                            break;
                        }
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(MessengerCommand::Send { frame, response_tx }) => {
                            let id = frame.id();
                            correlation.lock().insert(id, response_tx);

                            if outbound.send(frame).is_err() {
                                warn!(%id, "Channel closed, request not sent");
                                if let Some(tx) = correlation.lock().remove(&id) {
                                    let _ = tx.send(Err(Error::ConnectionClosed));
                                }
                            } else {
                                trace!(%id, "Request sent");
                            }
                        }

                        Some(MessengerCommand::Post(frame)) => {
                            if outbound.send(frame).is_err() {
                                warn!("Channel closed, message dropped");
                            }
                        }

                        Some(MessengerCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(MessengerCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Self::fail_pending_requests(&correlation);

        debug!("Messenger event loop terminated");
    }

    /// Runs one inbound request through the pipeline and answers it.
    async fn deliver(
        id: RequestId,
        message: MessageData,
        await_response: bool,
        pipeline: Arc<Pipeline>,
        listeners: Arc<RwLock<ListenerMap>>,
        outbound: mpsc::UnboundedSender<BridgeFrame>,
    ) {
        trace!(%id, event = %message.event, "Delivering inbound message");

        let reply = match pipeline.run(message).await {
            None => Value::Null,
            Some(surviving) => {
                let registered: Vec<MessageListener> = listeners
                    .read()
                    .get(&surviving.event)
                    .cloned()
                    .unwrap_or_default();

                let mut answer = None;
                for listener in registered {
                    let value = listener(&surviving);
                    if answer.is_none() {
                        answer = value;
                    }
                }

                match answer {
                    Some(value) => value,
                    None => serde_json::to_value(&surviving).unwrap_or(Value::Null),
                }
            }
        };

        if await_response && outbound.send(BridgeFrame::Response { id, payload: reply }).is_err() {
            warn!(%id, "Channel closed, reply dropped");
        }
    }

    /// Fails all pending requests when the loop stops.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// WeakMessenger
// ============================================================================

/// Non-owning reference to a [`Messenger`].
///
/// Interceptors that need to reach back into their messenger hold this to
/// avoid a reference cycle through the pipeline.
#[derive(Debug, Clone)]
pub struct WeakMessenger {
    inner: Weak<MessengerInner>,
}

impl WeakMessenger {
    /// Returns the messenger if it is still alive.
    #[inline]
    #[must_use]
    pub fn upgrade(&self) -> Option<Messenger> {
        self.inner.upgrade().map(|inner| Messenger { inner })
    }
}

// ============================================================================
// Tests
// ============================================================================
