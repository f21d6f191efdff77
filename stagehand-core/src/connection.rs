//! Connection state machine for the capture device.
//!
//! Pure state transitions with no I/O. The server's OBS client drives it and
//! consults it to decide when to reconnect.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Identifying ──► Connected
//!       ▲               │               │              │
//!       │               ▼               ▼              ▼
//!       └──(retry)──── Error ◄───────────┴──────────────┘
//! ```
//!
//! Reconnects happen at a fixed interval for as long as the process runs;
//! there is no escalating backoff.

use serde::{Deserialize, Serialize};

/// Default delay between reconnect attempts
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Not connected, no attempt in progress
    #[default]
    Disconnected,
    /// Socket connect in progress
    Connecting,
    /// Socket open, Hello/Identify handshake in progress
    Identifying,
    /// Identified; requests can be sent
    Connected,
    /// Last attempt failed or the connection dropped, will retry
    Error,
    /// No more connection attempts
    ShuttingDown,
}

impl ConnectionState {
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Identifying)
    }

    pub fn should_reconnect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Identifying => write!(f, "Identifying"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error => write!(f, "Error"),
            ConnectionState::ShuttingDown => write!(f, "Shutting Down"),
        }
    }
}

/// Tracks the connection state and when the next attempt is due.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Consecutive failed attempts, for logging only
    failure_count: u32,
    retry_interval_ms: u64,
    last_state_change_ms: u64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL_MS)
    }
}

impl ConnectionManager {
    pub fn new(retry_interval_ms: u64) -> Self {
        ConnectionManager {
            state: ConnectionState::Disconnected,
            failure_count: 0,
            retry_interval_ms,
            last_state_change_ms: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn can_send(&self) -> bool {
        self.state.can_send()
    }

    /// Delay before the next attempt. Always the configured interval.
    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_interval_ms
    }

    pub fn time_in_state_ms(&self, current_time_ms: u64) -> u64 {
        current_time_ms.saturating_sub(self.last_state_change_ms)
    }

    /// Whether a new attempt may start now.
    pub fn retry_due(&self, current_time_ms: u64) -> bool {
        match self.state {
            ConnectionState::Disconnected => true,
            ConnectionState::Error => self.time_in_state_ms(current_time_ms) >= self.retry_interval_ms,
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // State Transitions
    // -------------------------------------------------------------------------

    pub fn start_connecting(&mut self, current_time_ms: u64) {
        if self.state.should_reconnect() {
            self.set_state(ConnectionState::Connecting, current_time_ms);
        }
    }

    /// Socket is open; the Hello message is expected next.
    pub fn start_identifying(&mut self, current_time_ms: u64) {
        if self.state == ConnectionState::Connecting {
            self.set_state(ConnectionState::Identifying, current_time_ms);
        }
    }

    pub fn connected(&mut self, current_time_ms: u64) {
        if self.state.is_connecting() {
            self.set_state(ConnectionState::Connected, current_time_ms);
            self.failure_count = 0;
        }
    }

    /// The attempt failed or an established connection dropped.
    pub fn error(&mut self, current_time_ms: u64) {
        if self.state != ConnectionState::ShuttingDown {
            self.set_state(ConnectionState::Error, current_time_ms);
            self.failure_count = self.failure_count.saturating_add(1);
        }
    }

    pub fn shutdown(&mut self, current_time_ms: u64) {
        self.set_state(ConnectionState::ShuttingDown, current_time_ms);
    }

    fn set_state(&mut self, new_state: ConnectionState, current_time_ms: u64) {
        if self.state != new_state {
            self.state = new_state;
            self.last_state_change_ms = current_time_ms;
        }
    }
}
