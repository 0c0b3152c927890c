use std::collections::VecDeque;

use snafu::ResultExt;
use tokio::sync::mpsc;

use super::attachment::{AttachmentEncoder, AttachmentFile, DEFAULT_MAX_ATTACHMENT_BYTES};
use super::composer::{
    AttachmentTicket, Composer, ComposerDraft, KeyOutcome, KeyPress, SendTicket, SubmitRejection,
};
use super::error::{DispatchSnafu, FetchError, HistorySnafu, SendError, ValidationError};
use super::ids::{MessageKey, PeerId, UserId};
use super::message::{ImagePayload, Message, OutgoingMessage, SendReceipt};
use super::scroll::{
    DEFAULT_BULK_ARRIVAL_THRESHOLD, DEFAULT_FOLLOW_THRESHOLD, Growth, ScrollBehavior,
    ScrollFollow, ScrollMetrics,
};
use super::subscription::{BindRejection, LiveDelivery, SubscriptionManager};
use super::transcript::{AppendOutcome, DEFAULT_DUPLICATE_WINDOW, LoadOutcome, LoadTicket, TranscriptStore};
use super::transport::Collaborators;

/// Tunables for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub follow_threshold: f32,
    pub bulk_arrival_threshold: usize,
    pub max_attachment_bytes: u64,
    pub duplicate_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            follow_threshold: DEFAULT_FOLLOW_THRESHOLD,
            bulk_arrival_threshold: DEFAULT_BULK_ARRIVAL_THRESHOLD,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

/// User intents, as a view would report them.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SelectPeer(Option<PeerId>),
    RetryHistory,
    Scrolled(ScrollMetrics),
    JumpToLatest,
    EditDraft(String),
    AttachFile(AttachmentFile),
    RemoveAttachment,
    KeyPressed(KeyPress),
    Submit,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    Validation,
    Fetch,
    Send,
    Live,
}

/// Transient, user-visible message. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    pub kind: NoticeKind,
    pub message: String,
}

/// A scroll the view should perform. `sequence` grows with every new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollRequest {
    pub sequence: u64,
    pub behavior: ScrollBehavior,
}

/// Read model handed to views.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub local_user_id: UserId,
    pub peer_id: Option<PeerId>,
    pub peer_online: bool,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub history_failed: bool,
    pub draft: ComposerDraft,
    pub auto_follow: bool,
    pub show_jump_to_latest: bool,
    pub scroll_request: Option<ScrollRequest>,
    pub listener_bound: bool,
    pub discarded_responses: u64,
}

/// What one applied input did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    HistoryApplied { peer_id: PeerId, count: usize },
    HistoryFailed { peer_id: PeerId },
    LiveAppended { key: MessageKey },
    LiveDuplicate,
    FeedClosed { peer_id: PeerId },
    /// The feed closed and a fresh listener took its place.
    FeedRebound { peer_id: PeerId },
    AttachmentReady,
    AttachmentRejected,
    SendConfirmed { key: MessageKey },
    SendFailed,
    /// A completion whose originating selection or draft is gone.
    StaleDiscarded,
}

pub(crate) enum Completion {
    History {
        ticket: LoadTicket,
        result: Result<Vec<Message>, FetchError>,
    },
    Attachment {
        ticket: AttachmentTicket,
        result: Result<ImagePayload, ValidationError>,
    },
    Send {
        ticket: SendTicket,
        payload: OutgoingMessage,
        result: Result<SendReceipt, SendError>,
    },
}

pub(crate) enum SessionInput {
    Completion(Completion),
    Live(LiveDelivery),
}

/// Owns the transcript, live binding, scroll policy and draft for one chat.
///
/// Async work runs on spawned tasks and comes back through an internal queue, so
/// every mutation happens on whichever task drives the controller.
pub struct SessionController {
    collaborators: Collaborators,
    local_user_id: UserId,
    encoder: AttachmentEncoder,
    transcript: TranscriptStore,
    subscriptions: SubscriptionManager,
    scroll: ScrollFollow,
    composer: Composer,
    scroll_request: Option<ScrollRequest>,
    scroll_sequence: u64,
    notices: VecDeque<SessionNotice>,
    discarded_responses: u64,
    /// One automatic rebind per selection after the transport drops the feed.
    rebind_spent: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SessionController {
    pub fn new(collaborators: Collaborators, config: SessionConfig) -> Self {
        let local_user_id = collaborators.identity.local_user_id();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            collaborators,
            local_user_id,
            encoder: AttachmentEncoder::new(config.max_attachment_bytes),
            transcript: TranscriptStore::new(config.duplicate_window),
            subscriptions: SubscriptionManager::new(),
            scroll: ScrollFollow::new(config.follow_threshold, config.bulk_arrival_threshold),
            composer: Composer::new(),
            scroll_request: None,
            scroll_sequence: 0,
            notices: VecDeque::new(),
            discarded_responses: 0,
            rebind_spent: false,
            completions_tx,
            completions_rx,
        }
    }

    pub fn local_user_id(&self) -> &UserId {
        &self.local_user_id
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.transcript.peer_id()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let peer_id = self.transcript.peer_id().cloned();
        let peer_online = peer_id
            .as_ref()
            .is_some_and(|peer_id| self.collaborators.presence.is_online(peer_id));

        SessionSnapshot {
            local_user_id: self.local_user_id.clone(),
            peer_id,
            peer_online,
            messages: self.transcript.messages().to_vec(),
            is_loading: self.transcript.is_loading(),
            history_failed: self.transcript.load_failed(),
            draft: self.composer.draft().clone(),
            auto_follow: self.scroll.is_following(),
            show_jump_to_latest: self.scroll.shows_jump_affordance(),
            scroll_request: self.scroll_request,
            listener_bound: self.subscriptions.has_listener(),
            discarded_responses: self.discarded_responses,
        }
    }

    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        self.notices.drain(..).collect()
    }

    /// Switches the conversation. Transcript and draft of the previous peer are dropped.
    pub async fn select_peer(&mut self, peer_id: Option<PeerId>) {
        if peer_id.as_ref() == self.transcript.peer_id() && self.transcript.is_loading() {
            tracing::debug!("peer already loading; selection ignored");
            return;
        }

        self.scroll.reset();
        self.scroll_request = None;
        self.composer.reset(peer_id.clone());

        match peer_id {
            Some(peer_id) => {
                tracing::info!(peer_id = %peer_id, "peer selected");
                self.start_history_load(peer_id).await;
            }
            None => {
                tracing::info!("chat closed");
                self.subscriptions.teardown().await;
                self.transcript.clear();
            }
        }
    }

    /// Loads the current peer again after a failed fetch. The draft is kept.
    pub async fn retry_history(&mut self) {
        let Some(peer_id) = self.transcript.peer_id().cloned() else {
            tracing::debug!("retry requested without an open chat");
            return;
        };
        if self.transcript.is_loading() {
            return;
        }

        tracing::info!(peer_id = %peer_id, "retrying history load");
        self.scroll.reset();
        self.start_history_load(peer_id).await;
    }

    pub fn scrolled(&mut self, metrics: ScrollMetrics) {
        self.scroll.update_follow_state(metrics);
    }

    pub fn jump_to_latest(&mut self) {
        self.scroll.request_scroll_to_bottom();
        self.flush_scroll();
    }

    pub fn edit_draft(&mut self, text: impl Into<String>) {
        self.composer.set_text(text);
    }

    /// Validates the type right away, then reads the file off the driving task.
    ///
    /// The newest pick wins: reads still running for earlier picks are dropped.
    pub fn attach_file(&mut self, file: AttachmentFile) -> Result<(), ValidationError> {
        let Some(ticket) = self.composer.begin_attachment() else {
            tracing::debug!(name = %file.name, "attachment ignored without an open chat");
            return Ok(());
        };

        if let Err(error) = self.encoder.validate(&file) {
            tracing::info!(name = %file.name, error = %error, "attachment rejected");
            self.notify(NoticeKind::Validation, error.to_string());
            return Err(error);
        }

        let encoder = self.encoder;
        let completions_tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = encoder.encode(file).await;
            let _ = completions_tx.send(Completion::Attachment { ticket, result });
        });
        Ok(())
    }

    pub fn remove_attachment(&mut self) {
        self.composer.remove_attachment();
    }

    pub fn key_pressed(&mut self, key: KeyPress) -> KeyOutcome {
        let outcome = self.composer.handle_key(key);
        if outcome == KeyOutcome::Submit {
            let _ = self.submit();
        }
        outcome
    }

    /// Starts a send unless the draft is empty or one is already in flight.
    pub fn submit(&mut self) -> Result<(), SubmitRejection> {
        // A reload would replace the transcript under the confirmed message.
        let started = if self.transcript.is_loading() {
            Err(SubmitRejection::HistoryLoading)
        } else {
            self.composer.begin_send()
        };
        let pending = match started {
            Ok(pending) => pending,
            Err(rejection) => {
                tracing::debug!(rejection = ?rejection, "submit ignored");
                return Err(rejection);
            }
        };

        tracing::debug!(peer_id = %pending.ticket.peer_id, "sending message");
        let transport = self.collaborators.transport.clone();
        let completions_tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let ticket = pending.ticket;
            let payload = pending.payload;
            let result = transport
                .send(payload.clone())
                .await
                .context(DispatchSnafu {
                    stage: "send-message",
                    peer_id: ticket.peer_id.clone(),
                });
            let _ = completions_tx.send(Completion::Send {
                ticket,
                payload,
                result,
            });
        });
        Ok(())
    }

    pub async fn apply_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectPeer(peer_id) => self.select_peer(peer_id).await,
            SessionCommand::RetryHistory => self.retry_history().await,
            SessionCommand::Scrolled(metrics) => self.scrolled(metrics),
            SessionCommand::JumpToLatest => self.jump_to_latest(),
            SessionCommand::EditDraft(text) => self.edit_draft(text),
            SessionCommand::AttachFile(file) => {
                let _ = self.attach_file(file);
            }
            SessionCommand::RemoveAttachment => self.remove_attachment(),
            SessionCommand::KeyPressed(key) => {
                self.key_pressed(key);
            }
            SessionCommand::Submit => {
                let _ = self.submit();
            }
            SessionCommand::Shutdown => self.shutdown().await,
        }
    }

    /// Waits for one async completion or live delivery and applies it.
    pub async fn pump(&mut self) -> SessionEvent {
        let input = self.next_input().await;
        self.apply_input(input).await
    }

    /// Detaches the live listener. The controller stays usable.
    pub async fn shutdown(&mut self) {
        self.subscriptions.teardown().await;
    }

    // Cancel-safe: neither branch loses an item when the other wins.
    pub(crate) async fn next_input(&mut self) -> SessionInput {
        tokio::select! {
            biased;
            Some(completion) = self.completions_rx.recv() => SessionInput::Completion(completion),
            delivery = self.subscriptions.next_delivery() => SessionInput::Live(delivery),
        }
    }

    pub(crate) async fn apply_input(&mut self, input: SessionInput) -> SessionEvent {
        let event = match input {
            SessionInput::Completion(Completion::History { ticket, result }) => {
                self.apply_history(ticket, result).await
            }
            SessionInput::Completion(Completion::Attachment { ticket, result }) => {
                self.apply_attachment(ticket, result)
            }
            SessionInput::Completion(Completion::Send {
                ticket,
                payload,
                result,
            }) => self.apply_send(ticket, payload, result),
            SessionInput::Live(delivery) => self.apply_live(delivery).await,
        };
        self.flush_scroll();
        event
    }

    async fn start_history_load(&mut self, peer_id: PeerId) {
        // Teardown completes here, before a new listener can be requested.
        self.subscriptions.prepare(peer_id.clone()).await;
        self.rebind_spent = false;
        let ticket = self.transcript.begin_load(peer_id);

        let transport = self.collaborators.transport.clone();
        let completions_tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = transport
                .fetch_history(&ticket.peer_id)
                .await
                .context(HistorySnafu {
                    stage: "fetch-history",
                    peer_id: ticket.peer_id.clone(),
                });
            let _ = completions_tx.send(Completion::History { ticket, result });
        });
    }

    async fn apply_history(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<Message>, FetchError>,
    ) -> SessionEvent {
        let event = match self.transcript.finish_load(&ticket, result) {
            LoadOutcome::Stale => {
                tracing::debug!(
                    peer_id = %ticket.peer_id,
                    generation = ticket.generation,
                    "discarded stale history response"
                );
                self.discarded_responses += 1;
                return SessionEvent::StaleDiscarded;
            }
            LoadOutcome::Applied { count } => {
                tracing::info!(peer_id = %ticket.peer_id, count, "history applied");
                self.scroll.on_growth(Growth::HistoryLoaded { count });
                SessionEvent::HistoryApplied {
                    peer_id: ticket.peer_id.clone(),
                    count,
                }
            }
            LoadOutcome::Failed(error) => {
                tracing::warn!(peer_id = %ticket.peer_id, error = %error, "history load failed");
                self.notify(
                    NoticeKind::Fetch,
                    format!("Could not load messages: {error}"),
                );
                SessionEvent::HistoryFailed {
                    peer_id: ticket.peer_id.clone(),
                }
            }
        };

        let transport = self.collaborators.transport.as_ref();
        match self.subscriptions.bind(&ticket.peer_id, transport).await {
            Ok(()) => {}
            Err(BindRejection::NotAwaiting { requested }) => {
                tracing::debug!(peer_id = %requested, "live binding no longer wanted");
            }
            Err(BindRejection::Subscribe { details, .. }) => {
                self.notify(
                    NoticeKind::Live,
                    format!("Live updates unavailable: {details}"),
                );
            }
        }
        event
    }

    fn apply_attachment(
        &mut self,
        ticket: AttachmentTicket,
        result: Result<ImagePayload, ValidationError>,
    ) -> SessionEvent {
        if !self.composer.accepts_attachment(&ticket) {
            tracing::debug!(
                peer_id = %ticket.draft.peer_id,
                revision = ticket.revision,
                "discarded superseded attachment read"
            );
            self.discarded_responses += 1;
            return SessionEvent::StaleDiscarded;
        }

        match result {
            Ok(preview) => {
                self.composer.set_attachment(preview);
                SessionEvent::AttachmentReady
            }
            Err(error) => {
                tracing::info!(error = %error, "attachment rejected");
                self.notify(NoticeKind::Validation, error.to_string());
                SessionEvent::AttachmentRejected
            }
        }
    }

    fn apply_send(
        &mut self,
        ticket: SendTicket,
        payload: OutgoingMessage,
        result: Result<SendReceipt, SendError>,
    ) -> SessionEvent {
        if !self.composer.is_current(&ticket) {
            tracing::info!(
                peer_id = %ticket.peer_id,
                "send settled after the chat changed; result dropped"
            );
            self.discarded_responses += 1;
            return SessionEvent::StaleDiscarded;
        }

        match result {
            Ok(receipt) => {
                self.composer.finish_send(&ticket, Ok(()));
                let message = payload.into_message(self.local_user_id.clone(), receipt);
                let key = message.key.clone();
                tracing::info!(peer_id = %ticket.peer_id, message_key = %key, "message sent");

                if self.transcript.append(message) == AppendOutcome::Appended {
                    self.scroll.on_growth(Growth::Arrival { count: 1 });
                }
                SessionEvent::SendConfirmed { key }
            }
            Err(error) => {
                tracing::warn!(peer_id = %ticket.peer_id, error = %error, "message send failed");
                self.composer.finish_send(&ticket, Err(error.to_string()));
                self.notify(NoticeKind::Send, format!("Message not sent: {error}"));
                SessionEvent::SendFailed
            }
        }
    }

    async fn apply_live(&mut self, delivery: LiveDelivery) -> SessionEvent {
        match delivery {
            LiveDelivery::Message(message) => {
                let key = message.key.clone();
                match self.transcript.append(message) {
                    AppendOutcome::Appended => {
                        self.scroll.on_growth(Growth::Arrival { count: 1 });
                        SessionEvent::LiveAppended { key }
                    }
                    AppendOutcome::Duplicate => SessionEvent::LiveDuplicate,
                }
            }
            LiveDelivery::Closed(peer_id) => {
                if !self.rebind_spent && self.transcript.peer_id() == Some(&peer_id) {
                    self.rebind_spent = true;
                    let transport = self.collaborators.transport.as_ref();
                    match self.subscriptions.rebind(&peer_id, transport).await {
                        Ok(()) => {
                            tracing::info!(peer_id = %peer_id, "live feed rebound after close");
                            return SessionEvent::FeedRebound { peer_id };
                        }
                        Err(rejection) => {
                            tracing::warn!(peer_id = %peer_id, rejection = ?rejection, "live feed rebind failed");
                        }
                    }
                }
                self.notify(
                    NoticeKind::Live,
                    "Live updates stopped; reopen the chat to reconnect",
                );
                SessionEvent::FeedClosed { peer_id }
            }
        }
    }

    fn flush_scroll(&mut self) {
        if let Some(behavior) = self.scroll.take_pending_scroll() {
            self.scroll_sequence += 1;
            self.scroll_request = Some(ScrollRequest {
                sequence: self.scroll_sequence,
                behavior,
            });
        }
    }

    fn notify(&mut self, kind: NoticeKind, message: impl Into<String>) {
        self.notices.push_back(SessionNotice {
            kind,
            message: message.into(),
        });
    }
}
