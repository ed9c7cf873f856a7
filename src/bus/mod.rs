//! Publish/subscribe message bus between the server and the MATLAB helper.
//!
//! One logical bidirectional bus carries JSON messages, each addressed by a
//! string channel. The server side exposes four operations: `publish`,
//! `subscribe`, `unsubscribe`, and `allocate_channel_id`, plus a
//! request/response helper that wires the correlation-id pattern used by all
//! feature providers (allocate an id, subscribe `<base-response>/<id>`,
//! publish with the id in the payload, resolve on first reply).
//!
//! The bus is decoupled from the wire through [`BusTransport`]: a pair of
//! channels bridged to a WebSocket by [`transport::connect`], or to an
//! in-process peer by [`loopback`] in tests.
//!
//! Failure semantics: `publish` on a closed bus is silently dropped;
//! `subscribe` on a closed bus fails with [`TransportError::Closed`].
//! Disconnection does not replay pending requests; callers bound their own
//! waits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use matls_protocol::channels;
use matls_protocol::envelope::{Envelope, EnvelopeError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub mod transport;

pub use transport::TlsMaterial;

// ============================================================================
// Errors and State
// ============================================================================

/// Errors surfaced by the bus and its transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation attempted on a dead bus.
    #[error("message bus is closed")]
    Closed,

    /// The WebSocket connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS connector construction failed.
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    /// A frame could not be encoded or decoded.
    #[error("malformed frame: {0}")]
    Frame(#[from] EnvelopeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state broadcast to registered listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Connected,
    Disconnected,
}

// ============================================================================
// Transport Seam
// ============================================================================

/// The wire half handed to a [`MessageBus`]: envelopes written to `outgoing`
/// reach the peer, envelopes from the peer arrive on `incoming`. Cancelling
/// `cancel` tears the underlying connection down.
pub struct BusTransport {
    pub outgoing: mpsc::UnboundedSender<Envelope>,
    pub incoming: mpsc::UnboundedReceiver<Envelope>,
    pub cancel: CancellationToken,
}

/// Create a pair of directly connected transports. Everything one side
/// publishes arrives on the other side's `incoming`. Used by tests and by
/// any in-process helper stub.
pub fn loopback() -> (BusTransport, BusTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        BusTransport {
            outgoing: a_tx,
            incoming: b_rx,
            cancel: cancel.clone(),
        },
        BusTransport {
            outgoing: b_tx,
            incoming: a_rx,
            cancel,
        },
    )
}

// ============================================================================
// Subscriptions
// ============================================================================

type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Opaque handle identifying a live topic listener. Owned by whoever created
/// it and released through [`MessageBus::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
}

struct SubEntry {
    id: u64,
    channel: String,
    handler: Handler,
}

impl SubEntry {
    /// Whether this entry matches an incoming bare channel name. A channel
    /// registered with a trailing `/*` segment also receives messages on any
    /// id-suffixed sub-channel.
    fn matches(&self, channel: &str) -> bool {
        if let Some(base) = self.channel.strip_suffix("/*") {
            channel == base || channel.strip_prefix(base).is_some_and(|r| r.starts_with('/'))
        } else {
            self.channel == channel
        }
    }
}

// ============================================================================
// Message Bus
// ============================================================================

struct BusInner {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    subscriptions: Mutex<Vec<SubEntry>>,
    next_subscription: AtomicU64,
    next_channel_id: AtomicU64,
    api_key: Option<String>,
    closed: AtomicBool,
    state_tx: watch::Sender<BusState>,
    cancel: CancellationToken,
}

/// Cloneable handle to one bus connection. All clones share the same
/// subscription table and wire connection.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Wrap a connected transport. When the transport supplies an API key it
    /// is attached to the headers of every outgoing frame.
    pub fn new(transport: BusTransport, api_key: Option<String>) -> Self {
        let BusTransport {
            outgoing,
            mut incoming,
            cancel,
        } = transport;

        let (state_tx, _) = watch::channel(BusState::Connected);
        let inner = Arc::new(BusInner {
            outgoing: Mutex::new(Some(outgoing)),
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            next_channel_id: AtomicU64::new(1),
            api_key,
            closed: AtomicBool::new(false),
            state_tx,
            cancel: cancel.clone(),
        });

        let dispatch_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    envelope = incoming.recv() => match envelope {
                        Some(envelope) => dispatch_inner.dispatch(envelope),
                        None => break,
                    },
                }
            }
            dispatch_inner.tear_down();
        });

        MessageBus { inner }
    }

    /// Fire-and-forget delivery to all current subscribers of `channel` on
    /// the peer. Dropped silently when the connection is gone.
    pub fn publish(&self, channel: &str, payload: Value) {
        if self.inner.closed.load(Ordering::SeqCst) {
            trace!(channel, "dropping publish on closed bus");
            return;
        }
        let mut envelope = Envelope::new(channels::to_wire(channel), payload);
        if let Some(key) = &self.inner.api_key {
            envelope = envelope.with_api_key(key.clone());
        }
        let guard = self.inner.outgoing.lock().expect("bus lock poisoned");
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(envelope);
        }
    }

    /// Register a handler invoked once per message received on `channel`.
    /// Registering `<channel>/*` also receives id-suffixed sub-channels.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Result<Subscription, TransportError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscriptions
            .lock()
            .expect("bus lock poisoned")
            .push(SubEntry {
                id,
                channel: channel.to_string(),
                handler: Arc::new(handler),
            });
        trace!(channel, id, "subscribed");
        Ok(Subscription { id })
    }

    /// Release a subscription. Idempotent; after return no further handler
    /// invocation is guaranteed.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner
            .subscriptions
            .lock()
            .expect("bus lock poisoned")
            .retain(|entry| entry.id != subscription.id);
    }

    /// Process-unique string suitable for appending to a base channel to
    /// form a private reply inbox.
    pub fn allocate_channel_id(&self) -> String {
        self.inner
            .next_channel_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    /// One round of the correlated request/response pattern: allocate an id,
    /// subscribe `<response_base>/<id>`, publish on `request_channel` with
    /// the id injected into the payload as `channelId`, resolve on the first
    /// reply, unsubscribe. There is no built-in timeout.
    pub async fn request(
        &self,
        request_channel: &str,
        response_base: &str,
        mut payload: Value,
    ) -> Result<Value, TransportError> {
        let id = self.allocate_channel_id();
        let response_channel = channels::with_id(response_base, &id);

        let (reply_tx, reply_rx) = oneshot::channel();
        let reply_tx = Arc::new(Mutex::new(Some(reply_tx)));
        let subscription = self.subscribe(&response_channel, move |value| {
            if let Some(tx) = reply_tx.lock().expect("reply lock poisoned").take() {
                let _ = tx.send(value);
            }
        })?;

        if let Value::Object(map) = &mut payload {
            map.insert("channelId".to_string(), Value::String(id));
        }
        self.publish(request_channel, payload);

        // The handler (and with it the reply sender) is dropped if the bus
        // disconnects, which surfaces here as Closed.
        let result = reply_rx.await.map_err(|_| TransportError::Closed);
        self.unsubscribe(subscription);
        result
    }

    /// Watch lifecycle transitions (`Connected` / `Disconnected`).
    pub fn state(&self) -> watch::Receiver<BusState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the underlying connection and null internal client state.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.tear_down();
    }
}

impl BusInner {
    fn dispatch(&self, envelope: Envelope) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(channel) = channels::from_wire(&envelope.channel) else {
            debug!(channel = %envelope.channel, "dropping frame outside namespace");
            return;
        };
        let handlers: Vec<Handler> = {
            let subscriptions = self.subscriptions.lock().expect("bus lock poisoned");
            subscriptions
                .iter()
                .filter(|entry| entry.matches(channel))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };
        trace!(channel, handlers = handlers.len(), "dispatching");
        for handler in handlers {
            handler(envelope.payload.clone());
        }
    }

    /// Mark the bus dead: drop the writer, clear all subscriptions (pending
    /// request replies resolve as Closed), and notify lifecycle listeners.
    fn tear_down(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outgoing.lock().expect("bus lock poisoned").take();
        self.subscriptions
            .lock()
            .expect("bus lock poisoned")
            .clear();
        let _ = self.state_tx.send(BusState::Disconnected);
        debug!("message bus closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_secs(2);

    fn envelope(channel: &str, payload: Value) -> Envelope {
        Envelope::new(channels::to_wire(channel), payload)
    }

    #[tokio::test]
    async fn publish_reaches_the_peer_with_prefix_and_key() {
        let (ours, mut theirs) = loopback();
        let bus = MessageBus::new(ours, Some("cafe".into()));

        bus.publish("/linting/request", json!({"code": "x"}));

        let frame = timeout(TICK, theirs.incoming.recv()).await.unwrap().unwrap();
        assert_eq!(frame.channel, "/matls/linting/request");
        assert_eq!(frame.headers.api_key.as_deref(), Some("cafe"));
        assert_eq!(frame.payload, json!({"code": "x"}));
    }

    #[tokio::test]
    async fn subscriber_receives_matching_messages_only() {
        let (ours, theirs) = loopback();
        let bus = MessageBus::new(ours, None);

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        bus.subscribe("/linting/response", move |value| {
            let _ = seen_tx.send(value);
        })
        .unwrap();

        theirs
            .outgoing
            .send(envelope("/completions/response", json!(1)))
            .unwrap();
        theirs
            .outgoing
            .send(envelope("/linting/response", json!(2)))
            .unwrap();

        let value = timeout(TICK, seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(value, json!(2));
    }

    #[tokio::test]
    async fn parametric_subscription_matches_id_suffixed_channels() {
        let (ours, theirs) = loopback();
        let bus = MessageBus::new(ours, None);

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        bus.subscribe("/indexWorkspace/response/*", move |value| {
            let _ = seen_tx.send(value);
        })
        .unwrap();

        theirs
            .outgoing
            .send(envelope("/indexWorkspace/response/17", json!({"isDone": true})))
            .unwrap();

        let value = timeout(TICK, seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(value["isDone"], json!(true));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let (ours, theirs) = loopback();
        let bus = MessageBus::new(ours, None);

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let sub = bus
            .subscribe("/linting/response", move |value| {
                let _ = seen_tx.send(value);
            })
            .unwrap();
        bus.unsubscribe(sub);

        theirs
            .outgoing
            .send(envelope("/linting/response", json!(1)))
            .unwrap();

        // Give the dispatcher a turn; nothing must arrive.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn allocate_channel_id_is_unique() {
        let (ours, _theirs) = loopback();
        let bus = MessageBus::new(ours, None);
        let a = bus.allocate_channel_id();
        let b = bus.allocate_channel_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn request_correlates_one_reply() {
        let (ours, mut theirs) = loopback();
        let bus = MessageBus::new(ours, None);

        let peer = tokio::spawn(async move {
            let frame = theirs.incoming.recv().await.unwrap();
            assert_eq!(frame.channel, "/matls/formatDocument/request");
            let id = frame.payload["channelId"].as_str().unwrap().to_string();
            theirs
                .outgoing
                .send(envelope(
                    &format!("/formatDocument/response/{id}"),
                    json!({"data": "y = 2;"}),
                ))
                .unwrap();
        });

        let reply = timeout(
            TICK,
            bus.request(
                "/formatDocument/request",
                "/formatDocument/response",
                json!({"data": "y=2;"}),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply["data"], json!("y = 2;"));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_closes_the_bus() {
        let (ours, theirs) = loopback();
        let bus = MessageBus::new(ours, None);
        let mut state = bus.state();

        drop(theirs);

        timeout(TICK, state.wait_for(|s| *s == BusState::Disconnected))
            .await
            .unwrap()
            .unwrap();
        assert!(!bus.is_connected());
        assert!(matches!(
            bus.subscribe("/linting/response", |_| {}),
            Err(TransportError::Closed)
        ));
        // Publishing after disconnect is a silent no-op.
        bus.publish("/linting/request", json!({}));
    }

    #[tokio::test]
    async fn pending_request_resolves_closed_on_disconnect() {
        let (ours, theirs) = loopback();
        let bus = MessageBus::new(ours, None);

        let pending = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.request("/linting/request", "/linting/response", json!({}))
                    .await
            })
        };

        drop(theirs);
        let result = timeout(TICK, pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn close_notifies_listeners() {
        let (ours, _theirs) = loopback();
        let bus = MessageBus::new(ours, None);
        let mut state = bus.state();

        bus.close();

        timeout(TICK, state.wait_for(|s| *s == BusState::Disconnected))
            .await
            .unwrap()
            .unwrap();
    }
}
