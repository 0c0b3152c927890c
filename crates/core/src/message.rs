use std::borrow::Cow;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use snafu::{ResultExt, ensure};

use super::error::{DecodeDataUriSnafu, EmptyMessageSnafu, MalformedDataUriSnafu, ValidationError};
use super::ids::{LocalMessageId, MessageId, MessageKey, UserId};

const DATA_URI_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// Image carried by a message: inline bytes before persistence, a URL after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    Inline { mime_type: String, bytes: Arc<[u8]> },
    Remote { url: String },
}

impl ImagePayload {
    pub fn inline(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Inline {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self::Remote { url: url.into() }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Inline { bytes, .. } => bytes.is_empty(),
            Self::Remote { url } => url.trim().is_empty(),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Inline { mime_type, .. } => Some(mime_type),
            Self::Remote { .. } => None,
        }
    }

    /// Renders inline bytes as a self-contained `data:` URI.
    pub fn to_data_uri(&self) -> Option<String> {
        match self {
            Self::Inline { mime_type, bytes } => Some(format!(
                "{DATA_URI_PREFIX}{mime_type}{BASE64_MARKER},{}",
                STANDARD.encode(bytes)
            )),
            Self::Remote { .. } => None,
        }
    }

    /// Source string a renderer can embed directly.
    pub fn embed_source(&self) -> Cow<'_, str> {
        match self {
            Self::Inline { .. } => Cow::Owned(self.to_data_uri().unwrap_or_default()),
            Self::Remote { url } => Cow::Borrowed(url),
        }
    }

    pub fn parse_data_uri(raw: &str) -> Result<Self, ValidationError> {
        let stage = "parse-data-uri";
        let Some(rest) = raw.trim().strip_prefix(DATA_URI_PREFIX) else {
            return MalformedDataUriSnafu {
                stage,
                details: "missing `data:` prefix".to_string(),
            }
            .fail();
        };
        let Some((meta, payload)) = rest.split_once(',') else {
            return MalformedDataUriSnafu {
                stage,
                details: "missing `,` separator".to_string(),
            }
            .fail();
        };
        let Some(mime_type) = meta.strip_suffix(BASE64_MARKER) else {
            return MalformedDataUriSnafu {
                stage,
                details: "only base64 payloads are supported".to_string(),
            }
            .fail();
        };

        let bytes = STANDARD.decode(payload).context(DecodeDataUriSnafu { stage })?;
        Ok(Self::inline(mime_type, bytes))
    }
}

/// Whether a message was written by the local user or by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authorship {
    Own,
    Peer,
}

/// One transcript entry. Always carries text, an image, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: String,
    pub image: Option<ImagePayload>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        key: MessageKey,
        sender_id: UserId,
        recipient_id: UserId,
        text: impl Into<String>,
        image: Option<ImagePayload>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let text = text.into().trim().to_string();
        let image = image.filter(|image| !image.is_empty());
        ensure!(
            !text.is_empty() || image.is_some(),
            EmptyMessageSnafu {
                stage: "build-message",
            }
        );

        Ok(Self {
            key,
            sender_id,
            recipient_id,
            text,
            image,
            created_at,
        })
    }

    pub fn remote_id(&self) -> Option<&MessageId> {
        self.key.remote()
    }

    /// True when the peer is either side of this message.
    pub fn involves(&self, peer_id: &UserId) -> bool {
        &self.sender_id == peer_id || &self.recipient_id == peer_id
    }

    pub fn authorship(&self, local_user_id: &UserId) -> Authorship {
        if &self.sender_id == local_user_id {
            Authorship::Own
        } else {
            Authorship::Peer
        }
    }
}

/// Payload handed to the transport by the send pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub recipient_id: UserId,
    pub text: String,
    pub image: Option<ImagePayload>,
}

impl OutgoingMessage {
    pub fn new(
        recipient_id: UserId,
        text: impl Into<String>,
        image: Option<ImagePayload>,
    ) -> Result<Self, ValidationError> {
        let text = text.into().trim().to_string();
        let image = image.filter(|image| !image.is_empty());
        ensure!(
            !text.is_empty() || image.is_some(),
            EmptyMessageSnafu {
                stage: "build-outgoing-message",
            }
        );

        Ok(Self {
            recipient_id,
            text,
            image,
        })
    }

    /// Turns a confirmed payload into a transcript entry, stamping locally what
    /// the remote side left out.
    pub fn into_message(self, sender_id: UserId, receipt: SendReceipt) -> Message {
        let key = receipt
            .id
            .map(MessageKey::Remote)
            .unwrap_or_else(|| MessageKey::Local(LocalMessageId::new_v7()));

        Message {
            key,
            sender_id,
            recipient_id: self.recipient_id,
            text: self.text,
            image: receipt.image.or(self.image),
            created_at: receipt.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// What the transport reports back for a persisted send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: Option<MessageId>,
    pub created_at: Option<DateTime<Utc>>,
    /// Persisted form of the image, typically a remote URL.
    pub image: Option<ImagePayload>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[test]
    fn message_requires_text_or_image() {
        let at = Utc.timestamp_opt(10, 0).unwrap();
        let key = MessageKey::Local(LocalMessageId::new_v7());

        let blank = Message::new(key.clone(), user("a"), user("b"), "   ", None, at);
        assert!(matches!(blank, Err(ValidationError::EmptyMessage { .. })));

        let empty_image = ImagePayload::inline("image/png", Vec::<u8>::new());
        let still_blank = Message::new(key.clone(), user("a"), user("b"), "", Some(empty_image), at);
        assert!(still_blank.is_err());

        let image_only = Message::new(
            key,
            user("a"),
            user("b"),
            "",
            Some(ImagePayload::remote("https://cdn.example/p.png")),
            at,
        )
        .unwrap();
        assert!(image_only.text.is_empty());
        assert!(image_only.image.is_some());
    }

    #[test]
    fn authorship_and_involvement_follow_participants() {
        let at = Utc.timestamp_opt(10, 0).unwrap();
        let message = Message::new(
            MessageKey::Local(LocalMessageId::new_v7()),
            user("me"),
            user("alice"),
            " hi ",
            None,
            at,
        )
        .unwrap();

        assert_eq!(message.text, "hi");
        assert_eq!(message.authorship(&user("me")), Authorship::Own);
        assert_eq!(message.authorship(&user("alice")), Authorship::Peer);
        assert!(message.involves(&user("alice")));
        assert!(!message.involves(&user("bob")));
    }

    #[test]
    fn data_uri_survives_parse_and_rejects_non_base64() {
        let payload = ImagePayload::inline("image/gif", b"GIF89a".to_vec());
        let uri = payload.to_data_uri().unwrap();
        assert!(uri.starts_with("data:image/gif;base64,"));
        assert_eq!(ImagePayload::parse_data_uri(&uri).unwrap(), payload);

        assert!(ImagePayload::parse_data_uri("data:image/png,raw").is_err());
        assert!(ImagePayload::parse_data_uri("https://example.com/x.png").is_err());
        assert!(ImagePayload::remote("https://x").to_data_uri().is_none());
    }

    #[test]
    fn receipt_fields_win_over_local_stamps() {
        let outgoing = OutgoingMessage::new(user("alice"), "hello", None).unwrap();
        let stamped_at = Utc.timestamp_opt(42, 0).unwrap();
        let confirmed = outgoing.clone().into_message(
            user("me"),
            SendReceipt {
                id: Some(MessageId::parse("srv-1").unwrap()),
                created_at: Some(stamped_at),
                image: None,
            },
        );
        assert_eq!(confirmed.remote_id().map(MessageId::as_str), Some("srv-1"));
        assert_eq!(confirmed.created_at, stamped_at);

        let unstamped = outgoing.into_message(user("me"), SendReceipt::default());
        assert!(unstamped.key.is_local());
    }
}
