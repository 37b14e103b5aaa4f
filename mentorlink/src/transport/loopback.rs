//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a server. Each
//! accepted connection hands the test a [`LoopbackPeer`], the server side of
//! that connection: the peer can push inbound events, observe what the
//! client emitted, and sever the link by being dropped. Connect attempts can
//! be scripted to fail so reconnection paths are reproducible.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use mentorlink_proto::event::{InboundEvent, OutboundEvent};

use super::{Connection, Connector, TransportError};

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The attempt succeeds and a [`LoopbackPeer`] is handed out.
    Accept,
    /// The attempt fails with [`TransportError::Unreachable`].
    Refuse,
}

#[derive(Debug)]
struct Script {
    queued: VecDeque<Outcome>,
    fallback: Outcome,
}

#[derive(Debug)]
struct Shared {
    script: Mutex<Script>,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<LoopbackPeer>,
}

/// In-process [`Connector`] with scripted connect outcomes.
///
/// Cloning yields a handle to the same script and attempt counter.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    /// Create a connector that accepts every attempt.
    ///
    /// The returned receiver yields one [`LoopbackPeer`] per accepted
    /// connection, in connection order.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mentorlink::transport::loopback::LoopbackConnector;
    /// use mentorlink::transport::{Connection, Connector};
    ///
    /// # async fn example() {
    /// let (connector, mut peers) = LoopbackConnector::new();
    /// let _conn = connector.connect().await.unwrap();
    /// let _peer = peers.recv().await.unwrap();
    /// # }
    /// ```
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            script: Mutex::new(Script {
                queued: VecDeque::new(),
                fallback: Outcome::Accept,
            }),
            attempts: AtomicUsize::new(0),
            peers,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            peer_rx,
        )
    }

    /// Queue outcomes for the next attempts, consumed in order before the
    /// fallback applies.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.shared.script.lock().queued.extend(outcomes);
    }

    /// Outcome for every attempt once the scripted queue is empty.
    pub fn set_fallback(&self, outcome: Outcome) {
        self.shared.script.lock().fallback = outcome;
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        let mut script = self.shared.script.lock();
        let fallback = script.fallback;
        script.queued.pop_front().unwrap_or(fallback)
    }
}

impl Connector for LoopbackConnector {
    type Conn = LoopbackConnection;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<LoopbackConnection, TransportError>> + Send + 'static {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.next_outcome();
        let shared = Arc::clone(&self.shared);
        async move {
            if outcome == Outcome::Refuse {
                tracing::debug!(attempt, "loopback connect refused");
                return Err(TransportError::Unreachable("loopback".to_string()));
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let peer = LoopbackPeer {
                attempt,
                inbound: inbound_tx,
                outbound: outbound_rx,
            };
            shared
                .peers
                .send(peer)
                .map_err(|_| TransportError::Unreachable("loopback".to_string()))?;
            tracing::debug!(attempt, "loopback connect accepted");
            Ok(LoopbackConnection {
                inbound: inbound_rx,
                outbound: outbound_tx,
            })
        }
    }
}

/// Client side of an accepted loopback connection.
#[derive(Debug)]
pub struct LoopbackConnection {
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

impl Connection for LoopbackConnection {
    async fn emit(&mut self, event: &OutboundEvent) -> Result<(), TransportError> {
        self.outbound
            .send(event.clone())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.inbound.recv().await
    }

    async fn close(mut self) {
        // Stop delivery first; anything the peer pushes from here on is
        // rejected instead of queued.
        self.inbound.close();
        drop(self.outbound);
    }
}

/// Server side of one accepted loopback connection.
///
/// Dropping the peer severs the link: the client observes the connection as
/// closed and its emits fail.
#[derive(Debug)]
pub struct LoopbackPeer {
    attempt: usize,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl LoopbackPeer {
    /// The connect attempt (1-based, across the connector's lifetime) that
    /// produced this peer.
    #[must_use]
    pub const fn attempt(&self) -> usize {
        self.attempt
    }

    /// Push an event to the client.
    ///
    /// Returns `false` if the client has already closed the connection.
    pub fn deliver(&self, event: InboundEvent) -> bool {
        self.inbound.send(event).is_ok()
    }

    /// Wait for the next event the client emitted.
    ///
    /// Returns `None` once the client has closed the connection and every
    /// emitted event has been read.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.recv().await
    }

    /// Take an already-emitted event without waiting.
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.try_recv().ok()
    }

    /// Whether the client side has closed or dropped its connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}
