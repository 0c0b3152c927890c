use snafu::ResultExt;

use super::error::{FetchError, HistorySnafu};
use super::ids::PeerId;
use super::message::Message;
use super::transport::ChatTransport;

/// How many tail entries are checked when guarding against double delivery.
pub const DEFAULT_DUPLICATE_WINDOW: usize = 32;

/// Identifies one history load so late responses can be recognized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub peer_id: PeerId,
    pub generation: u64,
}

/// Result of applying a finished history load.
#[derive(Debug)]
pub enum LoadOutcome {
    Applied { count: usize },
    /// The selection moved on; the response was dropped untouched.
    Stale,
    Failed(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Same remote id already sits near the tail.
    Duplicate,
}

/// Ordered message history for the one active peer.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    peer_id: Option<PeerId>,
    messages: Vec<Message>,
    loading: bool,
    load_failed: bool,
    generation: u64,
    duplicate_window: usize,
}

impl TranscriptStore {
    pub fn new(duplicate_window: usize) -> Self {
        Self {
            peer_id: None,
            messages: Vec::new(),
            loading: false,
            load_failed: false,
            generation: 0,
            duplicate_window: duplicate_window.max(1),
        }
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.peer_id.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn load_failed(&self) -> bool {
        self.load_failed
    }

    /// Discards the current transcript and opens a load for `peer_id`.
    ///
    /// Any ticket handed out earlier stops matching from here on.
    pub fn begin_load(&mut self, peer_id: PeerId) -> LoadTicket {
        self.generation = self.generation.wrapping_add(1);
        self.peer_id = Some(peer_id.clone());
        self.messages.clear();
        self.loading = true;
        self.load_failed = false;

        LoadTicket {
            peer_id,
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.generation == ticket.generation && self.peer_id.as_ref() == Some(&ticket.peer_id)
    }

    /// Replaces the transcript with a finished load, unless the ticket is stale.
    pub fn finish_load(
        &mut self,
        ticket: &LoadTicket,
        result: Result<Vec<Message>, FetchError>,
    ) -> LoadOutcome {
        if !self.is_current(ticket) || !self.loading {
            return LoadOutcome::Stale;
        }

        self.loading = false;
        match result {
            Ok(mut messages) => {
                // History is chronological; a stable sort keeps arrival order for equal stamps.
                messages.sort_by_key(|message| message.created_at);
                let count = messages.len();
                self.messages = messages;
                LoadOutcome::Applied { count }
            }
            Err(error) => {
                self.messages.clear();
                self.load_failed = true;
                LoadOutcome::Failed(error)
            }
        }
    }

    /// Fetches and applies history in one step.
    pub async fn load_history(
        &mut self,
        transport: &dyn ChatTransport,
        peer_id: PeerId,
    ) -> Result<&[Message], FetchError> {
        let ticket = self.begin_load(peer_id);
        let result = transport
            .fetch_history(&ticket.peer_id)
            .await
            .context(HistorySnafu {
                stage: "load-history",
                peer_id: ticket.peer_id.clone(),
            });

        match self.finish_load(&ticket, result) {
            LoadOutcome::Applied { .. } | LoadOutcome::Stale => Ok(&self.messages),
            LoadOutcome::Failed(error) => Err(error),
        }
    }

    /// Appends at the tail in observation order.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if let Some(remote_id) = message.remote_id() {
            let duplicate = self
                .messages
                .iter()
                .rev()
                .take(self.duplicate_window)
                .any(|existing| existing.remote_id() == Some(remote_id));
            if duplicate {
                tracing::debug!(message_id = %remote_id, "ignored duplicate delivery");
                return AppendOutcome::Duplicate;
            }
        }

        if let Some(last) = self.messages.last()
            && message.created_at < last.created_at
        {
            tracing::debug!(
                message_key = %message.key,
                "appended message is older than the transcript tail"
            );
        }

        self.messages.push(message);
        AppendOutcome::Appended
    }

    /// Drops everything, including the peer scope. Pending loads become stale.
    pub fn clear(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.peer_id = None;
        self.messages.clear();
        self.loading = false;
        self.load_failed = false;
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_WINDOW)
    }
}
