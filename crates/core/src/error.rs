use std::path::PathBuf;

use snafu::Snafu;

use super::ids::PeerId;

/// Rejected local input: attachments and message content.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ValidationError {
    #[snafu(display("{id_type} must not be blank"))]
    BlankId {
        stage: &'static str,
        id_type: &'static str,
    },
    #[snafu(display("attachment type '{mime_type}' is not an image"))]
    UnsupportedType {
        stage: &'static str,
        mime_type: String,
    },
    #[snafu(display("attachment '{name}' is empty"))]
    EmptyFile { stage: &'static str, name: String },
    #[snafu(display(
        "attachment '{name}' is {size_bytes} bytes, above the {limit_bytes} byte limit"
    ))]
    TooLarge {
        stage: &'static str,
        name: String,
        size_bytes: u64,
        limit_bytes: u64,
    },
    #[snafu(display("failed to read attachment at {path:?} on `{stage}`: {source}"))]
    ReadAttachment {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("message has neither text nor image"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("malformed data URI: {details}"))]
    MalformedDataUri {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("data URI payload is not valid base64: {source}"))]
    DecodeDataUri {
        stage: &'static str,
        source: base64::DecodeError,
    },
}

/// Failure signalled by the transport collaborator.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("transport unavailable on `{stage}`: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("transport rejected request on `{stage}`: {details}"))]
    Rejected {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("transport channel closed on `{stage}`"))]
    Closed { stage: &'static str },
}

/// History load failure for one peer.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("failed to load history for {peer_id} on `{stage}`: {source}"))]
    History {
        stage: &'static str,
        peer_id: PeerId,
        source: TransportError,
    },
}

/// Outbound message failure. The draft survives it.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SendError {
    #[snafu(display("failed to send message to {peer_id} on `{stage}`: {source}"))]
    Dispatch {
        stage: &'static str,
        peer_id: PeerId,
        source: TransportError,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Failure talking to a spawned session task.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("session task is gone; `{stage}` was not delivered"))]
    Stopped { stage: &'static str },
    #[snafu(display("session task failed on `{stage}`: {source}"))]
    Join {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}
