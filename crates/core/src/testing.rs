//! Scripted collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::error::{TransportError, TransportResult};
use crate::ids::{MessageId, MessageKey, PeerId, UserId};
use crate::message::{Message, OutgoingMessage, SendReceipt};
use crate::transport::{BoxFuture, ChatTransport, Identity, LiveFeed, Presence};

pub(crate) fn user(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

/// Remote-keyed text message whose text equals its id.
pub(crate) fn message_at(id: &str, sender: &str, recipient: &str, seconds: i64) -> Message {
    Message::new(
        MessageKey::Remote(MessageId::parse(id).unwrap()),
        user(sender),
        user(recipient),
        id,
        None,
        Utc.timestamp_opt(seconds, 0).unwrap(),
    )
    .unwrap()
}

enum HistoryReply {
    Ready(TransportResult<Vec<Message>>),
    Gated(oneshot::Receiver<TransportResult<Vec<Message>>>),
}

enum SendReply {
    Ready(TransportResult<SendReceipt>),
    Gated(oneshot::Receiver<TransportResult<SendReceipt>>),
}

#[derive(Default)]
struct ScriptState {
    histories: HashMap<PeerId, TransportResult<Vec<Message>>>,
    gated_histories: HashMap<PeerId, VecDeque<oneshot::Receiver<TransportResult<Vec<Message>>>>>,
    send_replies: VecDeque<SendReply>,
    sent: Vec<OutgoingMessage>,
    listeners: HashMap<u64, mpsc::UnboundedSender<Message>>,
    next_listener_id: u64,
    peak_listeners: usize,
    subscribe_calls: usize,
    fetch_calls: usize,
    fail_unsubscribe: bool,
    online: HashSet<UserId>,
}

/// In-memory transport whose replies can be held back until a test releases them.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    local_user_id: UserId,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub(crate) fn new(local_user_id: UserId) -> Self {
        Self {
            local_user_id,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_history(&self, peer_id: &PeerId, messages: Vec<Message>) {
        self.lock().histories.insert(peer_id.clone(), Ok(messages));
    }

    pub(crate) fn fail_history(&self, peer_id: &PeerId, error: TransportError) {
        self.lock().histories.insert(peer_id.clone(), Err(error));
    }

    /// Next fetch for `peer_id` waits until the returned sender fires.
    pub(crate) fn gate_history(
        &self,
        peer_id: &PeerId,
    ) -> oneshot::Sender<TransportResult<Vec<Message>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock()
            .gated_histories
            .entry(peer_id.clone())
            .or_default()
            .push_back(reply_rx);
        reply_tx
    }

    pub(crate) fn gate_send(&self) -> oneshot::Sender<TransportResult<SendReceipt>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock().send_replies.push_back(SendReply::Gated(reply_rx));
        reply_tx
    }

    pub(crate) fn fail_next_send(&self, error: TransportError) {
        self.lock().send_replies.push_back(SendReply::Ready(Err(error)));
    }

    pub(crate) fn fail_unsubscribe(&self) {
        self.lock().fail_unsubscribe = true;
    }

    pub(crate) fn set_online(&self, user_id: &UserId) {
        self.lock().online.insert(user_id.clone());
    }

    /// Delivers to every attached listener, like a socket broadcast.
    pub(crate) fn push_live(&self, message: Message) {
        let state = self.lock();
        for listener in state.listeners.values() {
            let _ = listener.send(message.clone());
        }
    }

    /// Closes every listener channel from the transport side.
    pub(crate) fn drop_listeners(&self) {
        self.lock().listeners.clear();
    }

    pub(crate) fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    pub(crate) fn peak_listeners(&self) -> usize {
        self.lock().peak_listeners
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    pub(crate) fn sent(&self) -> Vec<OutgoingMessage> {
        self.lock().sent.clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn fetch_history<'a>(
        &'a self,
        peer_id: &'a PeerId,
    ) -> BoxFuture<'a, TransportResult<Vec<Message>>> {
        Box::pin(async move {
            let reply = {
                let mut state = self.lock();
                state.fetch_calls += 1;
                match state
                    .gated_histories
                    .get_mut(peer_id)
                    .and_then(VecDeque::pop_front)
                {
                    Some(reply_rx) => HistoryReply::Gated(reply_rx),
                    None => HistoryReply::Ready(
                        state
                            .histories
                            .get(peer_id)
                            .cloned()
                            .unwrap_or_else(|| Ok(Vec::new())),
                    ),
                }
            };

            match reply {
                HistoryReply::Ready(result) => result,
                HistoryReply::Gated(reply_rx) => reply_rx.await.unwrap_or(Err(
                    TransportError::Closed {
                        stage: "scripted-history",
                    },
                )),
            }
        })
    }

    fn subscribe<'a>(&'a self) -> BoxFuture<'a, TransportResult<LiveFeed>> {
        Box::pin(async move {
            let state_handle = self.state.clone();
            let mut state = self.lock();
            state.subscribe_calls += 1;
            let listener_id = state.next_listener_id;
            state.next_listener_id += 1;

            let (event_tx, feed) = LiveFeed::channel(move || {
                Box::pin(async move {
                    let mut state = state_handle.lock().unwrap();
                    state.listeners.remove(&listener_id);
                    if state.fail_unsubscribe {
                        return Err(TransportError::Rejected {
                            stage: "scripted-unsubscribe",
                            details: "listener already gone".to_string(),
                        });
                    }
                    Ok(())
                })
            });

            state.listeners.insert(listener_id, event_tx);
            state.peak_listeners = state.peak_listeners.max(state.listeners.len());
            Ok(feed)
        })
    }

    fn send<'a>(&'a self, payload: OutgoingMessage) -> BoxFuture<'a, TransportResult<SendReceipt>> {
        Box::pin(async move {
            let reply = {
                let mut state = self.lock();
                state.sent.push(payload);
                let sequence = state.sent.len();
                state.send_replies.pop_front().unwrap_or_else(|| {
                    SendReply::Ready(Ok(SendReceipt {
                        id: Some(MessageId::parse(&format!("sent-{sequence}")).unwrap()),
                        created_at: Some(Utc::now()),
                        image: None,
                    }))
                })
            };

            match reply {
                SendReply::Ready(result) => result,
                SendReply::Gated(reply_rx) => reply_rx.await.unwrap_or(Err(
                    TransportError::Closed {
                        stage: "scripted-send",
                    },
                )),
            }
        })
    }
}

impl Presence for ScriptedTransport {
    fn online_users(&self) -> Arc<HashSet<UserId>> {
        Arc::new(self.lock().online.clone())
    }
}

impl Identity for ScriptedTransport {
    fn local_user_id(&self) -> UserId {
        self.local_user_id.clone()
    }
}
