//! Session token coordination.
//!
//! Every authenticated request goes through [`TokenCoordinator::execute`].
//! When a request fails because the access token expired, the coordinator
//! performs exactly one renewal round trip per instance; requests that fail
//! while that renewal is in flight are parked in a FIFO queue and replayed,
//! each at most once, with the fresh credential. A failed renewal rejects
//! the whole queue, purges stored credentials and broadcasts logout.
//!
//! Two sibling instances sharing one refresh token can still race each
//! other across the broadcast boundary; the server is assumed to treat
//! refresh exchange as idempotent-safe, and a renewal failure caused by
//! that race is handled as an ordinary renewal failure, not a special case.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse, ApiTransport};
use crate::auth::credentials::{CredentialStore, TokenPair};
use crate::broadcast::{SessionBroadcaster, SessionMessage};
use crate::error::ApiError;

/// In-process session signal. `generation` bumps on every credential
/// change so the realtime channel can tear down and re-dial; a renewal
/// failure flips `authenticated` off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEpoch {
    pub generation: u64,
    pub authenticated: bool,
}

struct QueuedRequest {
    request: ApiRequest,
    responder: oneshot::Sender<Result<ApiResponse, ApiError>>,
}

#[derive(Default)]
struct RenewalState {
    in_flight: bool,
    queue: VecDeque<QueuedRequest>,
}

pub struct TokenCoordinator {
    transport: Arc<dyn ApiTransport>,
    credentials: Arc<dyn CredentialStore>,
    broadcaster: SessionBroadcaster,
    state: Mutex<RenewalState>,
    epoch_tx: watch::Sender<SessionEpoch>,
}

impl TokenCoordinator {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        credentials: Arc<dyn CredentialStore>,
        broadcaster: SessionBroadcaster,
    ) -> Self {
        let authenticated = credentials.tokens().is_some();
        let (epoch_tx, _) = watch::channel(SessionEpoch {
            generation: 0,
            authenticated,
        });
        Self {
            transport,
            credentials,
            broadcaster,
            state: Mutex::new(RenewalState::default()),
            epoch_tx,
        }
    }

    /// Observe credential generation and authenticated state.
    pub fn subscribe_epoch(&self) -> watch::Receiver<SessionEpoch> {
        self.epoch_tx.subscribe()
    }

    /// Issue a request with the current credential, driving renewal on an
    /// expired-token failure. Non-credential failures pass straight through.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let Some(tokens) = self.credentials.tokens() else {
            return Err(ApiError::AuthInvalid);
        };
        match self.transport.send(&request, &tokens.access_token).await {
            Err(ApiError::AuthExpired) => self.recover(request).await,
            other => other,
        }
    }

    /// Adopt a credential pair issued elsewhere (login, or a broadcast from
    /// a sibling instance). Last write wins across instances.
    pub fn adopt_tokens(&self, pair: &TokenPair) {
        if let Err(e) = self.credentials.set_tokens(pair) {
            warn!("failed to persist adopted tokens: {e}");
        }
        self.bump_epoch(true);
    }

    /// Adopt a pair from an interactive login and announce it, so sibling
    /// instances pick up the new session without their own round trip.
    pub fn install_tokens(&self, pair: &TokenPair) {
        self.adopt_tokens(pair);
        self.broadcaster.publish(SessionMessage::token_update(
            &pair.access_token,
            &pair.refresh_token,
        ));
    }

    /// Drop the session locally without announcing it. Used when reacting
    /// to a logout broadcast; repeated calls are no-ops.
    pub fn adopt_logout(&self) {
        if self.credentials.tokens().is_none() && !self.epoch_tx.borrow().authenticated {
            return;
        }
        if let Err(e) = self.credentials.clear() {
            warn!("failed to clear credentials: {e}");
        }
        self.bump_epoch(false);
    }

    /// Drop the session and announce it to sibling instances.
    pub fn logout(&self) {
        self.adopt_logout();
        self.broadcaster.publish(SessionMessage::logout());
    }

    async fn recover(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let waiter = {
            let mut state = self.state.lock().await;
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(QueuedRequest {
                    request: request.clone(),
                    responder: tx,
                });
                debug!(queued = state.queue.len(), "request parked behind renewal");
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };

        match waiter {
            // Renewal owner dropped without replaying us; treat as failed.
            Some(rx) => rx.await.unwrap_or(Err(ApiError::AuthInvalid)),
            None => self.drive_renewal(request).await,
        }
    }

    async fn drive_renewal(&self, trigger: ApiRequest) -> Result<ApiResponse, ApiError> {
        // Snapshot before anything else can replace the pair. A missing
        // refresh token short-circuits straight to the failure path.
        let refresh_token = self.credentials.tokens().map(|t| t.refresh_token);

        let renewed = match refresh_token {
            Some(refresh_token) => self.transport.renew(&refresh_token).await,
            None => Err(ApiError::AuthInvalid),
        };

        match renewed {
            Ok(pair) => {
                info!("credential renewal succeeded");
                if let Err(e) = self.credentials.set_tokens(&pair) {
                    warn!("failed to persist renewed tokens: {e}");
                }
                self.broadcaster.publish(SessionMessage::token_update(
                    &pair.access_token,
                    &pair.refresh_token,
                ));
                self.bump_epoch(true);
                self.replay(trigger, &pair).await
            }
            Err(err) => {
                warn!("credential renewal failed: {err}");
                if let Err(e) = self.credentials.clear() {
                    warn!("failed to purge credentials: {e}");
                }
                self.broadcaster.publish(SessionMessage::logout());
                self.bump_epoch(false);
                self.reject_queue().await;
                Err(ApiError::AuthInvalid)
            }
        }
    }

    /// Replay the triggering request, then the queue in arrival order, each
    /// exactly once with the fresh credential. A request that fails again,
    /// for any reason, gets that failure back; it is never re-queued.
    async fn replay(&self, trigger: ApiRequest, pair: &TokenPair) -> Result<ApiResponse, ApiError> {
        let own = self.transport.send(&trigger, &pair.access_token).await;

        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(queued) => Some(queued),
                    None => {
                        // Clearing the flag and observing an empty queue
                        // happen under one lock, so nothing can be stranded.
                        state.in_flight = false;
                        None
                    }
                }
            };
            let Some(queued) = next else { break };
            let result = self.transport.send(&queued.request, &pair.access_token).await;
            let _ = queued.responder.send(result);
        }

        own
    }

    async fn reject_queue(&self) {
        let drained = {
            let mut state = self.state.lock().await;
            state.in_flight = false;
            std::mem::take(&mut state.queue)
        };
        for queued in drained {
            let _ = queued.responder.send(Err(ApiError::AuthInvalid));
        }
    }

    fn bump_epoch(&self, authenticated: bool) {
        self.epoch_tx.send_modify(|epoch| {
            epoch.generation += 1;
            epoch.authenticated = authenticated;
        });
    }
}
