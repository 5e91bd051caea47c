//! Presence Monitor: per-connection ping/pong liveness detection.
//!
//! ```text
//! Alive --(tick, ping sent)--> AwaitingPong --(pong)--> Alive
//!                              AwaitingPong --(timeout)--> Dead --> deregistered
//! ```
//!
//! Catches half-open transports (client killed without a close frame) that
//! the reader loop alone would wait on forever. Each connection runs its own
//! monitor; one connection dying never touches another.

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::chat::presence;
use crate::config::HeartbeatConfig;
use crate::ws::broadcast::close_connection;
use crate::ws::{ConnectionHandle, ConnectionRegistry};

const PING_PAYLOAD: &[u8] = b"ping";

/// Close code sent when a connection misses its pong (1001 = going away).
pub const CLOSE_PONG_TIMEOUT: u16 = 1001;

/// Liveness of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Alive,
    AwaitingPong,
    Dead,
}

/// Handed to the reader loop; one `()` per pong frame received.
pub type PongSender = mpsc::UnboundedSender<()>;

pub struct PresenceMonitor {
    registry: ConnectionRegistry,
    connection: ConnectionHandle,
    config: HeartbeatConfig,
    pongs: mpsc::UnboundedReceiver<()>,
    state: LivenessState,
}

impl PresenceMonitor {
    pub fn new(
        registry: ConnectionRegistry,
        connection: ConnectionHandle,
        config: HeartbeatConfig,
    ) -> (Self, PongSender) {
        let (pong_tx, pongs) = mpsc::unbounded_channel();
        let monitor = Self {
            registry,
            connection,
            config,
            pongs,
            state: LivenessState::Alive,
        };
        (monitor, pong_tx)
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn spawn(self) -> JoinHandle<LivenessState> {
        tokio::spawn(self.run())
    }

    /// Probe until the connection dies or leaves the registry.
    /// Returns the state the monitor stopped in.
    pub async fn run(mut self) -> LivenessState {
        let shutdown = self.connection.shutdown_token();
        let period = self.config.ping_interval();
        // First probe one full period after acceptance
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return self.state,
                _ = ticker.tick() => {}
            }

            // A pong that arrived while Alive answers no probe
            while self.pongs.try_recv().is_ok() {}

            if self
                .connection
                .send(Message::Ping(Bytes::from_static(PING_PAYLOAD)))
                .is_err()
            {
                return self.die("ping undeliverable");
            }
            self.state = LivenessState::AwaitingPong;

            let pong = tokio::select! {
                _ = shutdown.cancelled() => return self.state,
                pong = timeout(self.config.pong_timeout(), self.pongs.recv()) => pong,
            };

            match pong {
                Ok(Some(())) => self.state = LivenessState::Alive,
                // Reader loop is gone; the actor deregisters on its way out
                Ok(None) => return self.state,
                Err(_) => return self.die("pong timeout"),
            }
        }
    }

    fn die(&mut self, reason: &str) -> LivenessState {
        self.state = LivenessState::Dead;
        let identity = self.connection.identity();
        tracing::warn!(
            connection_id = self.connection.id(),
            user_id = %identity.user_id,
            reason = reason,
            "Connection failed liveness check, closing"
        );

        close_connection(&self.connection, CLOSE_PONG_TIMEOUT, "Pong timeout");
        // Deregistering cancels the shutdown token, which stops the reader loop
        presence::connection_left(&self.registry, self.connection.id());
        LivenessState::Dead
    }
}
