use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::error::TransportResult;
use super::ids::{PeerId, UserId};
use super::message::{Message, OutgoingMessage, SendReceipt};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Detach = Box<dyn FnOnce() -> BoxFuture<'static, TransportResult<()>> + Send>;

/// Push channel of inbound messages plus the handle that detaches it.
///
/// The feed is unfiltered; scoping to one peer happens in the subscription manager.
pub struct LiveFeed {
    events: mpsc::UnboundedReceiver<Message>,
    detach: Option<Detach>,
}

impl LiveFeed {
    pub fn new<F>(events: mpsc::UnboundedReceiver<Message>, detach: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, TransportResult<()>> + Send + 'static,
    {
        Self {
            events,
            detach: Some(Box::new(detach)),
        }
    }

    /// Builds a feed backed by a fresh unbounded channel.
    pub fn channel<F>(detach: F) -> (mpsc::UnboundedSender<Message>, Self)
    where
        F: FnOnce() -> BoxFuture<'static, TransportResult<()>> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (event_tx, Self::new(event_rx, detach))
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.events.try_recv().ok()
    }

    /// Detaches the listener from the transport. Messages still buffered are dropped.
    pub async fn unsubscribe(mut self) -> TransportResult<()> {
        self.events.close();
        match self.detach.take() {
            Some(detach) => detach().await,
            None => Ok(()),
        }
    }
}

impl Stream for LiveFeed {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        if self.detach.is_some() {
            // Dropping the receiver still closes the channel; the transport prunes it on next send.
            tracing::debug!("live feed dropped without an explicit unsubscribe");
        }
    }
}

/// History, live feed and send, as provided by the socket/HTTP layer.
pub trait ChatTransport: Send + Sync {
    /// Conversation between the local user and `peer_id`, oldest first.
    fn fetch_history<'a>(&'a self, peer_id: &'a PeerId)
    -> BoxFuture<'a, TransportResult<Vec<Message>>>;

    fn subscribe<'a>(&'a self) -> BoxFuture<'a, TransportResult<LiveFeed>>;

    fn send<'a>(&'a self, payload: OutgoingMessage) -> BoxFuture<'a, TransportResult<SendReceipt>>;
}

/// Read-only view of who is online. Updated independently of the session.
pub trait Presence: Send + Sync {
    fn online_users(&self) -> Arc<HashSet<UserId>>;

    fn is_online(&self, user_id: &UserId) -> bool {
        self.online_users().contains(user_id)
    }
}

pub trait Identity: Send + Sync {
    fn local_user_id(&self) -> UserId;
}

/// Everything the session consumes from the outside.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn ChatTransport>,
    pub presence: Arc<dyn Presence>,
    pub identity: Arc<dyn Identity>,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        presence: Arc<dyn Presence>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            transport,
            presence,
            identity,
        }
    }

    /// Uses one object for all three roles, which is how most clients are built.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: ChatTransport + Presence + Identity + 'static,
    {
        Self {
            transport: client.clone(),
            presence: client.clone(),
            identity: client,
        }
    }
}
