//! Connectivity tracking.
//!
//! Three states: network and realtime channel both up (`Connected`),
//! network up but channel down (`Degraded`), network down (`Offline`).
//! Transitions are edge-triggered and fan out over a watch channel; going
//! offline never tears down cached state, and a fresh connected edge is the
//! signal dependent stores use for their single catch-up fetch.
//!
//! The monitor does not bind to any platform reachability API. Hosts feed
//! it OS-level network events via `set_network_online`, and the realtime
//! channel reports its own liveness via `report_realtime`.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::constants::RECONNECT_MAX_ATTEMPTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Network up, realtime channel established.
    Connected,
    /// Network up, realtime channel down.
    Degraded,
    Offline,
}

impl Connectivity {
    pub fn is_connected(self) -> bool {
        self == Connectivity::Connected
    }

    /// Whether new reads should be routed to the cache instead of network.
    pub fn use_cache(self) -> bool {
        self == Connectivity::Offline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub connectivity: Connectivity,
    /// Unix seconds of the last moment the realtime channel was known live.
    pub last_seen: i64,
    pub reconnect_attempts: u32,
}

pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectivityState {
            connectivity: Connectivity::Degraded,
            last_seen: 0,
            reconnect_attempts: 0,
        });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    /// OS-level network event. Going online re-arms the realtime channel by
    /// resetting the attempt counter; going offline keeps cached state as-is.
    pub fn set_network_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            let next = if online {
                match state.connectivity {
                    Connectivity::Offline => Connectivity::Degraded,
                    other => other,
                }
            } else {
                Connectivity::Offline
            };
            if next == state.connectivity {
                return false;
            }
            info!(?next, "network transition");
            state.connectivity = next;
            if next == Connectivity::Degraded {
                state.reconnect_attempts = 0;
            }
            true
        });
    }

    /// Liveness report from the realtime channel (its connect loop doubles
    /// as the periodic poll). No-op while the network itself is down.
    pub fn report_realtime(&self, live: bool) {
        self.tx.send_if_modified(|state| {
            if state.connectivity == Connectivity::Offline {
                return false;
            }
            if live {
                state.last_seen = Utc::now().timestamp();
                state.reconnect_attempts = 0;
                if state.connectivity == Connectivity::Connected {
                    return false;
                }
                info!("realtime channel live");
                state.connectivity = Connectivity::Connected;
                true
            } else {
                if state.connectivity == Connectivity::Degraded {
                    return false;
                }
                info!("realtime channel lost");
                state.connectivity = Connectivity::Degraded;
                true
            }
        });
    }

    /// Record one failed reconnect dial. Returns whether the channel should
    /// keep retrying; exceeding the cap is reported, not fatal.
    pub fn note_reconnect_attempt(&self) -> bool {
        let mut keep_going = true;
        self.tx.send_if_modified(|state| {
            state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
            if state.reconnect_attempts >= RECONNECT_MAX_ATTEMPTS {
                warn!(
                    attempts = state.reconnect_attempts,
                    "realtime reconnect cap reached; waiting for online transition"
                );
                keep_going = false;
            }
            true
        });
        keep_going
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
