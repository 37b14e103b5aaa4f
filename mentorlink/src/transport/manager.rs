//! Connection lifecycle: open, reconnect with capped backoff, teardown.
//!
//! [`ConnectionManager`] owns at most one live [`Connection`]. Its
//! [`next`](ConnectionManager::next) method is the single place link state
//! advances: it waits out backoff delays, drives connect attempts and reads
//! inbound events, reporting each transition as a [`LinkEvent`]. Every wait
//! inside `next` keeps its state in the manager, so the future can be
//! dropped at any point (e.g. by `tokio::select!`) without losing progress.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use tokio::time::Sleep;

use mentorlink_proto::event::{InboundEvent, OutboundEvent};

use super::{Connection, ConnectionId, Connector, TransportError};

/// Reconnection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Whether lost or failed connections are retried at all.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any retry delay.
    pub max_delay: Duration,
    /// Consecutive failed retries before giving up.
    pub max_attempts: u32,
    /// Jitter applied to each delay, in `0.0..=1.0`. Zero disables jitter.
    pub randomization_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
            randomization_factor: 0.5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry `attempt` (1-based) without jitter: the initial
    /// delay doubled per attempt, capped at `max_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry `attempt` with jitter applied.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        if factor == 0.0 {
            return base;
        }
        let mut rng = rand::rng();
        let deviation = base.mul_f64(rng.random::<f64>() * factor);
        let jittered = if rng.random_bool(0.5) {
            base.saturating_sub(deviation)
        } else {
            base.saturating_add(deviation)
        };
        jittered.min(self.max_delay)
    }
}

/// Externally visible state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// First connection attempt in progress.
    Connecting,
    /// A connection is live.
    Connected,
    /// The link was lost or refused; retry `attempt` of `max_attempts` is
    /// pending or running.
    Reconnecting {
        /// Current retry, 1-based.
        attempt: u32,
        /// Retry budget.
        max_attempts: u32,
    },
    /// Retries are exhausted, disabled, or the manager is closed.
    Offline,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting {
                attempt,
                max_attempts,
            } => write!(f, "Reconnecting ({attempt}/{max_attempts})"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// A link transition or inbound event, as reported by
/// [`ConnectionManager::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A connection (initial or reconnect) was established.
    Connected(ConnectionId),
    /// An event arrived on the given connection.
    Event(ConnectionId, InboundEvent),
    /// The given connection was lost.
    Disconnected {
        /// Connection that went away.
        id: ConnectionId,
        /// Human-readable cause.
        reason: String,
    },
    /// A retry has been scheduled.
    Reconnecting {
        /// Retry number, 1-based.
        attempt: u32,
        /// Retry budget.
        max_attempts: u32,
        /// Wait before the retry starts.
        delay: Duration,
    },
    /// No further attempts will be made until [`ConnectionManager::reconnect`].
    Offline,
}

/// Why an emit was rejected.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// No connection is live right now; one is being (re)established.
    #[error("not connected")]
    NotConnected,
    /// Retries are exhausted or the manager is closed.
    #[error("offline")]
    Offline,
    /// The live connection failed while emitting; reconnection has started.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

type ConnectFuture<C> = Pin<Box<dyn Future<Output = Result<C, TransportError>> + Send>>;

enum Phase<C> {
    /// Never opened, or closed.
    Idle,
    /// A connect attempt is running. `attempt` 0 is the initial one.
    Connecting { attempt: u32, fut: ConnectFuture<C> },
    /// Waiting before retry `attempt`.
    Backoff { attempt: u32, sleep: Pin<Box<Sleep>> },
    /// Connected.
    Live { id: ConnectionId, conn: C },
    /// Gave up.
    Offline,
}

/// Result of one step of [`ConnectionManager::next`], applied after the
/// phase borrow ends.
enum Step<C> {
    BackoffElapsed(u32),
    Connected(u32, C),
    ConnectFailed(u32, TransportError),
    Event(ConnectionId, InboundEvent),
    Lost(ConnectionId),
}

/// Owns the real-time connection of one chat session.
pub struct ConnectionManager<K: Connector> {
    connector: K,
    config: ReconnectConfig,
    phase: Phase<K::Conn>,
    pending: VecDeque<LinkEvent>,
    /// Id of the connection that is live or being established.
    current: ConnectionId,
    next_id: u64,
}

impl<K: Connector> ConnectionManager<K> {
    /// Create an idle manager. Nothing happens until [`open`](Self::open).
    pub fn new(connector: K, config: ReconnectConfig) -> Self {
        Self {
            connector,
            config,
            phase: Phase::Idle,
            pending: VecDeque::new(),
            current: ConnectionId::new(0),
            next_id: 1,
        }
    }

    /// Start connecting, unless a connection is already live or being
    /// established, in which case the current id is returned and nothing
    /// new is started.
    pub fn open(&mut self) -> ConnectionId {
        match self.phase {
            Phase::Idle | Phase::Offline => self.start_attempt(0),
            Phase::Connecting { .. } | Phase::Backoff { .. } | Phase::Live { .. } => self.current,
        }
    }

    /// Abandon any retry cycle and try again immediately with a fresh
    /// attempt budget. A live connection is left untouched.
    pub fn reconnect(&mut self) -> ConnectionId {
        if matches!(self.phase, Phase::Live { .. }) {
            return self.current;
        }
        tracing::info!("manual reconnect requested");
        self.start_attempt(0)
    }

    /// Tear down the connection and stop reconnecting.
    ///
    /// Inbound delivery stops before the transport closes; events still
    /// queued are discarded. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.pending.clear();
        if let Phase::Live { id, conn } = std::mem::replace(&mut self.phase, Phase::Idle) {
            tracing::debug!(%id, "closing connection");
            conn.close().await;
        }
    }

    /// Emit an event on the live connection.
    ///
    /// # Errors
    ///
    /// - [`EmitError::NotConnected`] while connecting or waiting to retry.
    /// - [`EmitError::Offline`] once retries are exhausted or after close.
    /// - [`EmitError::Transport`] if the live connection failed; it is torn
    ///   down and reconnection starts.
    pub async fn emit(&mut self, event: &OutboundEvent) -> Result<(), EmitError> {
        let (id, result) = match &mut self.phase {
            Phase::Live { id, conn } => (*id, conn.emit(event).await),
            Phase::Connecting { .. } | Phase::Backoff { .. } => {
                return Err(EmitError::NotConnected);
            }
            Phase::Idle | Phase::Offline => return Err(EmitError::Offline),
        };
        if let Err(e) = result {
            tracing::warn!(%id, err = %e, "emit failed, dropping connection");
            self.lose(id, e.to_string());
            return Err(EmitError::Transport(e));
        }
        Ok(())
    }

    /// Wait for the next link event.
    ///
    /// Cancel-safe. Pends forever while idle or offline.
    pub async fn next(&mut self) -> LinkEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let step = match &mut self.phase {
                Phase::Idle | Phase::Offline => std::future::pending().await,
                Phase::Backoff { attempt, sleep } => {
                    sleep.as_mut().await;
                    Step::BackoffElapsed(*attempt)
                }
                Phase::Connecting { attempt, fut } => match fut.as_mut().await {
                    Ok(conn) => Step::Connected(*attempt, conn),
                    Err(e) => Step::ConnectFailed(*attempt, e),
                },
                Phase::Live { id, conn } => match conn.next_event().await {
                    Some(event) => Step::Event(*id, event),
                    None => Step::Lost(*id),
                },
            };
            match step {
                Step::BackoffElapsed(attempt) => {
                    self.start_attempt(attempt);
                }
                Step::Connected(attempt, conn) => {
                    let id = self.current;
                    tracing::info!(%id, attempt, "connection established");
                    self.phase = Phase::Live { id, conn };
                    return LinkEvent::Connected(id);
                }
                Step::ConnectFailed(attempt, e) => {
                    tracing::warn!(attempt, err = %e, "connect attempt failed");
                    self.schedule_retry(attempt + 1);
                }
                Step::Event(id, event) => return LinkEvent::Event(id, event),
                Step::Lost(id) => self.lose(id, "connection closed".to_string()),
            }
        }
    }

    /// Current link status.
    #[must_use]
    pub const fn status(&self) -> LinkStatus {
        match &self.phase {
            Phase::Connecting { attempt: 0, .. } => LinkStatus::Connecting,
            Phase::Connecting { attempt, .. } | Phase::Backoff { attempt, .. } => {
                LinkStatus::Reconnecting {
                    attempt: *attempt,
                    max_attempts: self.config.max_attempts,
                }
            }
            Phase::Live { .. } => LinkStatus::Connected,
            Phase::Idle | Phase::Offline => LinkStatus::Offline,
        }
    }

    /// Id of the live connection, if any.
    #[must_use]
    pub const fn live_id(&self) -> Option<ConnectionId> {
        match &self.phase {
            Phase::Live { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// The reconnection policy in effect.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn start_attempt(&mut self, attempt: u32) -> ConnectionId {
        self.current = ConnectionId::new(self.next_id);
        self.next_id += 1;
        tracing::debug!(id = %self.current, attempt, "starting connect attempt");
        self.phase = Phase::Connecting {
            attempt,
            fut: Box::pin(self.connector.connect()),
        };
        self.current
    }

    /// Drop the live connection `id` and enter the retry cycle.
    fn lose(&mut self, id: ConnectionId, reason: String) {
        // Dropping the connection stops its reader.
        self.phase = Phase::Idle;
        tracing::warn!(%id, %reason, "connection lost");
        self.pending.push_back(LinkEvent::Disconnected { id, reason });
        self.schedule_retry(1);
    }

    fn schedule_retry(&mut self, attempt: u32) {
        if !self.config.enabled || attempt > self.config.max_attempts {
            tracing::warn!(
                attempts = attempt.saturating_sub(1),
                "giving up on reconnection"
            );
            self.phase = Phase::Offline;
            self.pending.push_back(LinkEvent::Offline);
            return;
        }
        let delay = self.config.delay(attempt);
        tracing::info!(attempt, max_attempts = self.config.max_attempts, ?delay, "reconnecting");
        self.phase = Phase::Backoff {
            attempt,
            sleep: Box::pin(tokio::time::sleep(delay)),
        };
        self.pending.push_back(LinkEvent::Reconnecting {
            attempt,
            max_attempts: self.config.max_attempts,
            delay,
        });
    }
}
