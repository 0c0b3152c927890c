use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use blink_core::error::{ClosedSnafu, RejectedSnafu, UnavailableSnafu};
use blink_core::{
    BoxFuture, ChatTransport, Identity, LiveFeed, Message, MessageId, MessageKey, OutgoingMessage,
    PeerId, Presence, SendReceipt, TransportResult, UserId,
};
use chrono::{DateTime, Utc};
use snafu::ensure;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Unordered participant pair; both directions share one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConversationKey(UserId, UserId);

impl ConversationKey {
    fn new(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

#[derive(Default)]
struct Conversations {
    by_pair: HashMap<ConversationKey, Vec<Message>>,
    last_stamp: Option<DateTime<Utc>>,
}

type Listeners = HashMap<UserId, HashMap<u64, mpsc::UnboundedSender<Message>>>;

struct RelayInner {
    conversations: RwLock<Conversations>,
    listeners: RwLock<Listeners>,
    online: ArcSwap<HashSet<UserId>>,
    next_listener_id: AtomicU64,
    latency: Duration,
}

/// In-process message relay standing in for the socket server.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    pub fn new(latency: Duration) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                conversations: RwLock::new(Conversations::default()),
                listeners: RwLock::new(HashMap::new()),
                online: ArcSwap::from_pointee(HashSet::new()),
                next_listener_id: AtomicU64::new(0),
                latency,
            }),
        }
    }

    /// Marks `user_id` online and hands out its client.
    pub fn connect(&self, user_id: UserId) -> RelayClient {
        self.inner.online.rcu(|online| {
            let mut online = HashSet::clone(online);
            online.insert(user_id.clone());
            online
        });
        tracing::info!(user_id = %user_id, "user connected to relay");

        RelayClient {
            relay: self.clone(),
            user_id,
        }
    }

    /// Marks `user_id` offline and closes every feed it holds.
    pub async fn disconnect(&self, user_id: &UserId) {
        self.inner.online.rcu(|online| {
            let mut online = HashSet::clone(online);
            online.remove(user_id);
            online
        });
        self.inner.listeners.write().await.remove(user_id);
        tracing::info!(user_id = %user_id, "user disconnected from relay");
    }

    pub fn online_users(&self) -> Arc<HashSet<UserId>> {
        self.inner.online.load_full()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.inner.online.load().contains(user_id)
    }

    /// Conversation between `a` and `b`, oldest first.
    pub async fn history(&self, a: &UserId, b: &UserId) -> Vec<Message> {
        self.simulate_latency().await;
        self.inner
            .conversations
            .read()
            .await
            .by_pair
            .get(&ConversationKey::new(a, b))
            .cloned()
            .unwrap_or_default()
    }

    /// Persists a message from `sender_id` and pushes it to the recipient's feeds.
    pub async fn deliver(
        &self,
        sender_id: &UserId,
        payload: OutgoingMessage,
    ) -> TransportResult<Message> {
        let stage = "relay-deliver";
        ensure!(
            self.is_online(sender_id),
            UnavailableSnafu {
                stage,
                details: format!("{sender_id} is not connected"),
            }
        );
        ensure!(
            &payload.recipient_id != sender_id,
            RejectedSnafu {
                stage,
                details: "cannot message yourself".to_string(),
            }
        );
        self.simulate_latency().await;

        let message = {
            let mut conversations = self.inner.conversations.write().await;
            // Stamps never go backwards, even if the wall clock does.
            let now = Utc::now();
            let created_at = conversations.last_stamp.map_or(now, |last| last.max(now));
            conversations.last_stamp = Some(created_at);

            let message = build_message(sender_id, payload, created_at)?;
            conversations
                .by_pair
                .entry(ConversationKey::new(&message.sender_id, &message.recipient_id))
                .or_default()
                .push(message.clone());
            message
        };

        self.fan_out(&message).await;
        tracing::debug!(
            sender_id = %message.sender_id,
            recipient_id = %message.recipient_id,
            message_key = %message.key,
            "relayed message"
        );
        Ok(message)
    }

    /// Opens a live feed of every message addressed to `user_id`.
    pub async fn listen(&self, user_id: &UserId) -> TransportResult<LiveFeed> {
        ensure!(
            self.is_online(user_id),
            ClosedSnafu {
                stage: "relay-listen",
            }
        );

        let listener_id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let relay = self.clone();
        let owner = user_id.clone();
        let (event_tx, feed) = LiveFeed::channel(move || {
            Box::pin(async move {
                relay.remove_listener(&owner, listener_id).await;
                Ok(())
            })
        });

        self.inner
            .listeners
            .write()
            .await
            .entry(user_id.clone())
            .or_default()
            .insert(listener_id, event_tx);
        tracing::debug!(user_id = %user_id, listener_id, "listener attached");
        Ok(feed)
    }

    pub async fn listener_count(&self, user_id: &UserId) -> usize {
        self.inner
            .listeners
            .read()
            .await
            .get(user_id)
            .map_or(0, HashMap::len)
    }

    async fn remove_listener(&self, user_id: &UserId, listener_id: u64) {
        let mut listeners = self.inner.listeners.write().await;
        if let Some(owned) = listeners.get_mut(user_id) {
            owned.remove(&listener_id);
            if owned.is_empty() {
                listeners.remove(user_id);
            }
        }
        tracing::debug!(user_id = %user_id, listener_id, "listener detached");
    }

    async fn fan_out(&self, message: &Message) {
        let mut listeners = self.inner.listeners.write().await;
        let Some(owned) = listeners.get_mut(&message.recipient_id) else {
            return;
        };
        // Receivers dropped without unsubscribing are pruned here.
        owned.retain(|_, event_tx| event_tx.send(message.clone()).is_ok());
    }

    async fn simulate_latency(&self) {
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

fn build_message(
    sender_id: &UserId,
    payload: OutgoingMessage,
    created_at: DateTime<Utc>,
) -> TransportResult<Message> {
    let stage = "relay-build-message";
    let id = MessageId::parse(&Uuid::now_v7().to_string()).map_err(|error| {
        RejectedSnafu {
            stage,
            details: error.to_string(),
        }
        .build()
    })?;

    Message::new(
        MessageKey::Remote(id),
        sender_id.clone(),
        payload.recipient_id,
        payload.text,
        payload.image,
        created_at,
    )
    .map_err(|error| {
        RejectedSnafu {
            stage,
            details: error.to_string(),
        }
        .build()
    })
}

/// One user's connection to the relay.
#[derive(Clone)]
pub struct RelayClient {
    relay: Relay,
    user_id: UserId,
}

impl RelayClient {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub async fn disconnect(self) {
        self.relay.disconnect(&self.user_id).await;
    }
}

impl ChatTransport for RelayClient {
    fn fetch_history<'a>(
        &'a self,
        peer_id: &'a PeerId,
    ) -> BoxFuture<'a, TransportResult<Vec<Message>>> {
        Box::pin(async move {
            ensure!(
                self.relay.is_online(&self.user_id),
                UnavailableSnafu {
                    stage: "relay-fetch-history",
                    details: format!("{} is not connected", self.user_id),
                }
            );
            Ok(self.relay.history(&self.user_id, peer_id).await)
        })
    }

    fn subscribe<'a>(&'a self) -> BoxFuture<'a, TransportResult<LiveFeed>> {
        Box::pin(self.relay.listen(&self.user_id))
    }

    fn send<'a>(&'a self, payload: OutgoingMessage) -> BoxFuture<'a, TransportResult<SendReceipt>> {
        Box::pin(async move {
            let message = self.relay.deliver(&self.user_id, payload).await?;
            Ok(SendReceipt {
                id: message.remote_id().cloned(),
                created_at: Some(message.created_at),
                image: message.image,
            })
        })
    }
}

impl Presence for RelayClient {
    fn online_users(&self) -> Arc<HashSet<UserId>> {
        self.relay.online_users()
    }
}

impl Identity for RelayClient {
    fn local_user_id(&self) -> UserId {
        self.user_id.clone()
    }
}
