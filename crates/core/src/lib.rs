#![deny(unsafe_code)]

pub mod attachment;
pub mod composer;
/// Sidebar contact list and presence summaries.
pub mod contacts;
pub mod error;
pub mod handle;
pub mod ids;
pub mod message;
/// Auto-follow policy for the transcript viewport.
pub mod scroll;
/// The per-conversation controller tying every component together.
pub mod session;
pub mod subscription;
pub mod transcript;
/// Collaborator contracts: transport, presence and identity.
pub mod transport;

#[cfg(test)]
mod testing;

pub use attachment::{AttachmentEncoder, AttachmentFile, AttachmentSource};
pub use composer::{
    Composer, ComposerDraft, Key, KeyOutcome, KeyPress, SendState, SubmitRejection,
};
pub use contacts::{ContactList, ContactRow, Peer};
pub use error::{FetchError, SendError, SessionError, TransportError, TransportResult, ValidationError};
pub use handle::SessionHandle;
pub use ids::{LocalMessageId, MessageId, MessageKey, PeerId, UserId};
pub use message::{Authorship, ImagePayload, Message, OutgoingMessage, SendReceipt};
pub use scroll::{ScrollBehavior, ScrollFollow, ScrollMetrics};
pub use session::{
    NoticeKind, ScrollRequest, SessionCommand, SessionConfig, SessionController, SessionEvent,
    SessionNotice, SessionSnapshot,
};
pub use subscription::{BindingState, SubscriptionManager};
pub use transcript::{AppendOutcome, TranscriptStore};
pub use transport::{BoxFuture, ChatTransport, Collaborators, Identity, LiveFeed, Presence};
