use futures::StreamExt;

use super::error::TransportResult;
use super::ids::PeerId;
use super::message::Message;
use super::transport::{ChatTransport, LiveFeed};

/// Binding state of the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BindingState {
    #[default]
    Unbound,
    /// Peer selected, history still loading; no listener yet.
    AwaitingHistory(PeerId),
    Bound(PeerId),
}

/// What the feed produced for the bound peer.
#[derive(Debug)]
pub enum LiveDelivery {
    Message(Message),
    /// The transport closed the feed on its own.
    Closed(PeerId),
}

/// Rejection reasons for attaching a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindRejection {
    NotAwaiting { requested: PeerId },
    Subscribe { peer_id: PeerId, details: String },
}

/// Owns the single live listener and scopes it to one peer.
#[derive(Default)]
pub struct SubscriptionManager {
    state: BindingState,
    feed: Option<LiveFeed>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &BindingState {
        &self.state
    }

    pub fn bound_peer(&self) -> Option<&PeerId> {
        match &self.state {
            BindingState::Bound(peer_id) => Some(peer_id),
            BindingState::Unbound | BindingState::AwaitingHistory(_) => None,
        }
    }

    pub fn has_listener(&self) -> bool {
        self.feed.is_some()
    }

    /// Tears down whatever is bound and waits for history of `peer_id`.
    ///
    /// Teardown finishes before this returns, so a later bind can never overlap it.
    pub async fn prepare(&mut self, peer_id: PeerId) {
        self.teardown().await;
        tracing::debug!(peer_id = %peer_id, "awaiting history before binding live feed");
        self.state = BindingState::AwaitingHistory(peer_id);
    }

    /// Attaches the live listener once history for `peer_id` has settled.
    pub async fn bind(
        &mut self,
        peer_id: &PeerId,
        transport: &dyn ChatTransport,
    ) -> Result<(), BindRejection> {
        if self.state != BindingState::AwaitingHistory(peer_id.clone()) {
            return Err(BindRejection::NotAwaiting {
                requested: peer_id.clone(),
            });
        }

        // Never two listeners: anything left over is detached first.
        if self.feed.is_some() {
            self.detach_feed().await;
        }

        match transport.subscribe().await {
            Ok(feed) => {
                self.feed = Some(feed);
                self.state = BindingState::Bound(peer_id.clone());
                tracing::info!(peer_id = %peer_id, "live feed bound");
                Ok(())
            }
            Err(error) => {
                self.state = BindingState::Unbound;
                tracing::warn!(peer_id = %peer_id, error = %error, "failed to bind live feed");
                Err(BindRejection::Subscribe {
                    peer_id: peer_id.clone(),
                    details: error.to_string(),
                })
            }
        }
    }

    /// Reattaches `peer_id` after the transport closed its feed. Only valid while unbound.
    pub async fn rebind(
        &mut self,
        peer_id: &PeerId,
        transport: &dyn ChatTransport,
    ) -> Result<(), BindRejection> {
        if self.state != BindingState::Unbound {
            return Err(BindRejection::NotAwaiting {
                requested: peer_id.clone(),
            });
        }
        self.prepare(peer_id.clone()).await;
        self.bind(peer_id, transport).await
    }

    /// Detaches the listener and returns to `Unbound`. Transport errors are only logged.
    pub async fn teardown(&mut self) {
        if let BindingState::Bound(peer_id) | BindingState::AwaitingHistory(peer_id) = &self.state {
            tracing::debug!(peer_id = %peer_id, "tearing down live binding");
        }
        self.detach_feed().await;
        self.state = BindingState::Unbound;
    }

    /// Next message involving the bound peer. Pending forever while unbound.
    ///
    /// Cancel-safe: nothing is consumed unless it is returned.
    pub async fn next_delivery(&mut self) -> LiveDelivery {
        loop {
            let (BindingState::Bound(peer_id), Some(feed)) = (&self.state, self.feed.as_mut())
            else {
                return std::future::pending().await;
            };

            match feed.next().await {
                Some(message) if message.involves(peer_id) => {
                    return LiveDelivery::Message(message);
                }
                Some(message) => {
                    tracing::trace!(
                        peer_id = %peer_id,
                        message_key = %message.key,
                        "live message for another peer skipped"
                    );
                }
                None => {
                    let peer_id = peer_id.clone();
                    tracing::warn!(peer_id = %peer_id, "live feed closed by transport");
                    self.feed = None;
                    self.state = BindingState::Unbound;
                    return LiveDelivery::Closed(peer_id);
                }
            }
        }
    }

    async fn detach_feed(&mut self) {
        let Some(feed) = self.feed.take() else {
            return;
        };

        let result: TransportResult<()> = feed.unsubscribe().await;
        if let Err(error) = result {
            tracing::warn!(error = %error, "live feed unsubscribe failed; continuing teardown");
        }
    }
}
