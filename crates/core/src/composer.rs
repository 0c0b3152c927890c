use super::ids::PeerId;
use super::message::{ImagePayload, OutgoingMessage};

/// Lifecycle of the outbound send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending,
    Failed {
        reason: String,
    },
}

/// Text and attachment the user is preparing for the active peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComposerDraft {
    pub text: String,
    pub attachment_preview: Option<ImagePayload>,
    pub send_state: SendState,
    /// Bumped whenever the file picker must forget its selection.
    pub file_input_revision: u64,
}

impl ComposerDraft {
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || self.attachment_preview.is_some()
    }

    pub fn is_sending(&self) -> bool {
        self.send_state == SendState::Sending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Other,
}

/// A key press from the text area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPress {
    pub key: Key,
    pub shift: bool,
}

impl KeyPress {
    pub const fn enter() -> Self {
        Self {
            key: Key::Enter,
            shift: false,
        }
    }

    pub const fn shift_enter() -> Self {
        Self {
            key: Key::Enter,
            shift: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Submit,
    InsertedNewline,
    Ignored,
}

/// Reasons a submit does not start a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRejection {
    NoRecipient,
    EmptyDraft,
    AlreadySending,
    /// History for the recipient has not settled yet.
    HistoryLoading,
}

/// Routing key for one in-flight send; stale once the draft is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SendTicket {
    pub peer_id: PeerId,
    pub generation: u64,
}

/// Routing key for one attachment read. Only the latest pick may fill the preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentTicket {
    pub draft: SendTicket,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub ticket: SendTicket,
    pub payload: OutgoingMessage,
}

/// Draft editing plus the `idle -> sending -> {idle, failed}` pipeline.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    recipient: Option<PeerId>,
    draft: ComposerDraft,
    generation: u64,
    attachment_revision: u64,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &ComposerDraft {
        &self.draft
    }

    pub fn recipient(&self) -> Option<&PeerId> {
        self.recipient.as_ref()
    }

    /// Discards the draft and scopes a fresh one to `recipient`.
    pub fn reset(&mut self, recipient: Option<PeerId>) {
        self.generation = self.generation.wrapping_add(1);
        self.attachment_revision = self.attachment_revision.wrapping_add(1);
        let file_input_revision = self.draft.file_input_revision.wrapping_add(1);
        self.recipient = recipient;
        self.draft = ComposerDraft {
            file_input_revision,
            ..ComposerDraft::default()
        };
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.draft.text = text.into();
    }

    pub fn set_attachment(&mut self, preview: ImagePayload) {
        self.draft.attachment_preview = Some(preview);
    }

    pub fn remove_attachment(&mut self) {
        self.attachment_revision = self.attachment_revision.wrapping_add(1);
        self.draft.attachment_preview = None;
        self.draft.file_input_revision = self.draft.file_input_revision.wrapping_add(1);
    }

    /// Plain Enter submits; Shift+Enter inserts a literal newline.
    pub fn handle_key(&mut self, key: KeyPress) -> KeyOutcome {
        match key {
            KeyPress {
                key: Key::Enter,
                shift: true,
            } => {
                self.draft.text.push('\n');
                KeyOutcome::InsertedNewline
            }
            KeyPress {
                key: Key::Enter,
                shift: false,
            } => KeyOutcome::Submit,
            KeyPress { key: Key::Other, .. } => KeyOutcome::Ignored,
        }
    }

    /// Ticket of the current draft; used to scope async attachment reads.
    pub fn ticket(&self) -> Option<SendTicket> {
        self.recipient.clone().map(|peer_id| SendTicket {
            peer_id,
            generation: self.generation,
        })
    }

    pub fn is_current(&self, ticket: &SendTicket) -> bool {
        self.generation == ticket.generation && self.recipient.as_ref() == Some(&ticket.peer_id)
    }

    /// Starts a new attachment pick. Reads from earlier picks go stale.
    pub fn begin_attachment(&mut self) -> Option<AttachmentTicket> {
        let draft = self.ticket()?;
        self.attachment_revision = self.attachment_revision.wrapping_add(1);
        Some(AttachmentTicket {
            draft,
            revision: self.attachment_revision,
        })
    }

    pub fn accepts_attachment(&self, ticket: &AttachmentTicket) -> bool {
        self.attachment_revision == ticket.revision && self.is_current(&ticket.draft)
    }

    /// Moves to `Sending` and hands out the payload, or says why not.
    ///
    /// A failed draft may be submitted again as-is.
    pub fn begin_send(&mut self) -> Result<PendingSend, SubmitRejection> {
        if self.draft.is_sending() {
            return Err(SubmitRejection::AlreadySending);
        }
        let Some(ticket) = self.ticket() else {
            return Err(SubmitRejection::NoRecipient);
        };

        let payload = OutgoingMessage::new(
            ticket.peer_id.clone(),
            self.draft.text.clone(),
            self.draft.attachment_preview.clone(),
        )
        .map_err(|_| SubmitRejection::EmptyDraft)?;

        self.draft.send_state = SendState::Sending;
        Ok(PendingSend { ticket, payload })
    }

    /// Settles the in-flight send. Returns false for a ticket from a discarded draft.
    pub fn finish_send(&mut self, ticket: &SendTicket, result: Result<(), String>) -> bool {
        if !self.is_current(ticket) || !self.draft.is_sending() {
            return false;
        }

        match result {
            Ok(()) => {
                self.attachment_revision = self.attachment_revision.wrapping_add(1);
                let file_input_revision = self.draft.file_input_revision.wrapping_add(1);
                self.draft = ComposerDraft {
                    file_input_revision,
                    ..ComposerDraft::default()
                };
            }
            Err(reason) => {
                self.draft.send_state = SendState::Failed { reason };
            }
        }
        true
    }
}
