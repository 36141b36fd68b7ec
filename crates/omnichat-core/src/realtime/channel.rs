//! Authenticated realtime channel.
//!
//! One websocket per client instance, dialed with the current access token
//! as a query parameter. A channel's auth context never changes after
//! creation: when the coordinator renews the credential (the session epoch
//! generation bumps), the channel is torn down and re-dialed with the new
//! token instead of patched in place. Reconnection backs off exponentially
//! with jitter up to a cap; past the cap the channel parks until the
//! connectivity monitor reports a fresh online transition.
//!
//! Liveness is polled: every poll interval the channel pings the server,
//! and a tick that arrives with the previous ping still unanswered drops
//! the connection, so a half-open socket cannot keep the monitor in
//! `Connected`. Every inbound frame refreshes the monitor's `last_seen`.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::auth::coordinator::SessionEpoch;
use crate::auth::CredentialStore;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::constants::{LIVENESS_POLL_SECS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS};
use crate::realtime::events::ServerEvent;

pub struct RealtimeChannel {
    url: String,
    credentials: Arc<dyn CredentialStore>,
    monitor: Arc<ConnectivityMonitor>,
    epoch_rx: watch::Receiver<SessionEpoch>,
    event_tx: mpsc::Sender<ServerEvent>,
    liveness_interval: Duration,
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = RECONNECT_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(RECONNECT_MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

impl RealtimeChannel {
    pub fn new(
        url: String,
        credentials: Arc<dyn CredentialStore>,
        monitor: Arc<ConnectivityMonitor>,
        epoch_rx: watch::Receiver<SessionEpoch>,
        event_tx: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            url,
            credentials,
            monitor,
            epoch_rx,
            event_tx,
            liveness_interval: Duration::from_secs(LIVENESS_POLL_SECS),
        }
    }

    #[cfg(test)]
    fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Drive the channel until the event receiver is dropped.
    pub async fn run(mut self) {
        let mut connectivity_rx = self.monitor.subscribe();

        loop {
            if self.event_tx.is_closed() {
                return;
            }

            // Gate on an authenticated session.
            if !self.epoch_rx.borrow().authenticated {
                if self.epoch_rx.changed().await.is_err() {
                    return;
                }
                continue;
            }

            // Gate on the network being up at all.
            if connectivity_rx.borrow().connectivity == Connectivity::Offline {
                if connectivity_rx.changed().await.is_err() {
                    return;
                }
                continue;
            }

            let Some(tokens) = self.credentials.tokens() else {
                if self.epoch_rx.changed().await.is_err() {
                    return;
                }
                continue;
            };
            let generation = self.epoch_rx.borrow_and_update().generation;

            match self.connect_and_stream(&tokens.access_token, generation, &mut connectivity_rx).await {
                StreamOutcome::ReceiverGone => return,
                StreamOutcome::Reauth => {
                    // Fresh epoch; re-dial immediately with the new token.
                    continue;
                }
                StreamOutcome::Disconnected => {
                    self.monitor.report_realtime(false);
                    let attempts = self.monitor.current().reconnect_attempts;
                    if self.monitor.note_reconnect_attempt() {
                        tokio::time::sleep(backoff_delay(attempts)).await;
                    } else {
                        // Cap reached. Park until the monitor re-arms us.
                        while self.monitor.current().reconnect_attempts != 0 {
                            if connectivity_rx.changed().await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_stream(
        &mut self,
        access_token: &str,
        generation: u64,
        connectivity_rx: &mut watch::Receiver<crate::connectivity::ConnectivityState>,
    ) -> StreamOutcome {
        let url = format!("{}?access_token={}", self.url, access_token);
        let mut ws = match connect_async(&url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                debug!("realtime dial failed: {e}");
                return StreamOutcome::Disconnected;
            }
        };
        info!("realtime channel established");
        self.monitor.report_realtime(true);

        let mut liveness = tokio::time::interval(self.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // A tick that finds the previous ping still unanswered is a dead peer.
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                frame = ws.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(raw))) => {
                            awaiting_pong = false;
                            self.monitor.report_realtime(true);
                            if let Some(event) = ServerEvent::parse(&raw) {
                                if self.event_tx.send(event).await.is_err() {
                                    return StreamOutcome::ReceiverGone;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                            awaiting_pong = false;
                            self.monitor.report_realtime(true);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("realtime channel closed by server");
                            return StreamOutcome::Disconnected;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("realtime channel error: {e}");
                            return StreamOutcome::Disconnected;
                        }
                    }
                }
                changed = self.epoch_rx.changed() => {
                    if changed.is_err() {
                        // Coordinator dropped; nothing left to authenticate for.
                        return StreamOutcome::ReceiverGone;
                    }
                    let epoch = *self.epoch_rx.borrow();
                    if epoch.generation != generation {
                        // Token renewed or session dropped; auth context is
                        // immutable per connection, so tear down.
                        info!("session epoch changed; re-dialing realtime channel");
                        return StreamOutcome::Reauth;
                    }
                }
                changed = connectivity_rx.changed() => {
                    if changed.is_err() {
                        return StreamOutcome::Disconnected;
                    }
                    if connectivity_rx.borrow().connectivity == Connectivity::Offline {
                        debug!("network went offline; dropping realtime channel");
                        return StreamOutcome::Disconnected;
                    }
                }
                _ = liveness.tick() => {
                    if awaiting_pong {
                        warn!("realtime liveness poll unanswered; dropping connection");
                        return StreamOutcome::Disconnected;
                    }
                    if ws.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        return StreamOutcome::Disconnected;
                    }
                    awaiting_pong = true;
                }
            }
        }
    }
}

enum StreamOutcome {
    Disconnected,
    Reauth,
    ReceiverGone,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;

    async fn wait_for(
        rx: &mut watch::Receiver<crate::connectivity::ConnectivityState>,
        wanted: Connectivity,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.borrow_and_update().connectivity != wanted {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {wanted:?}"));
    }

    #[tokio::test]
    async fn silent_peer_is_demoted_within_the_poll_window() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Keep the socket open but never answer pings.
            futures::future::pending::<()>().await;
        });

        let (epoch_tx, epoch_rx) = watch::channel(SessionEpoch {
            generation: 0,
            authenticated: true,
        });
        let monitor = Arc::new(ConnectivityMonitor::new());
        let (event_tx, _event_rx) = mpsc::channel(8);
        let channel = RealtimeChannel::new(
            format!("ws://{addr}"),
            Arc::new(MemoryCredentialStore::with_tokens("at", "rt")),
            monitor.clone(),
            epoch_rx,
            event_tx,
        )
        .with_liveness_interval(Duration::from_millis(200));

        let mut rx = monitor.subscribe();
        let run = tokio::spawn(channel.run());

        wait_for(&mut rx, Connectivity::Connected).await;
        wait_for(&mut rx, Connectivity::Degraded).await;

        run.abort();
        drop(epoch_tx);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let early = backoff_delay(0);
        assert!(early >= Duration::from_millis(RECONNECT_BASE_DELAY_MS));
        assert!(early <= Duration::from_millis(RECONNECT_BASE_DELAY_MS * 3 / 2));

        let late = backoff_delay(30);
        assert!(late >= Duration::from_millis(RECONNECT_MAX_DELAY_MS));
        assert!(late <= Duration::from_millis(RECONNECT_MAX_DELAY_MS * 3 / 2));
    }

    #[test]
    fn backoff_is_monotonic_before_cap() {
        // Compare lower bounds (jitter-free part) across attempts.
        for attempt in 0..5u32 {
            let lower = RECONNECT_BASE_DELAY_MS << attempt;
            assert!(backoff_delay(attempt) >= Duration::from_millis(lower.min(RECONNECT_MAX_DELAY_MS)));
        }
    }
}
