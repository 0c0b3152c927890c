use std::fmt;
use std::str::FromStr;

use snafu::ensure;
use uuid::Uuid;

use super::error::{BlankIdSnafu, ValidationError};

// Every opaque id assigned by a collaborator gets the same shape, so they never mix by accident.
macro_rules! define_remote_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier, trimming surrounding whitespace.
            pub fn parse(raw: &str) -> Result<Self, ValidationError> {
                let trimmed = raw.trim();
                ensure!(
                    !trimmed.is_empty(),
                    BlankIdSnafu {
                        stage: "parse-remote-id",
                        id_type: $id_type,
                    }
                );
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Self::parse(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_remote_id!(UserId, "user-id");
define_remote_id!(MessageId, "message-id");

/// Conversation counterpart. Peers and the local user share one id space.
pub type PeerId = UserId;

/// Locally-unique fallback for messages the remote side has not stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalMessageId(Uuid);

impl LocalMessageId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LocalMessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "local-{}", self.0)
    }
}

/// Identity of one transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Remote(MessageId),
    Local(LocalMessageId),
}

impl MessageKey {
    pub fn remote(&self) -> Option<&MessageId> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => id.fmt(formatter),
            Self::Local(id) => id.fmt(formatter),
        }
    }
}

impl From<MessageId> for MessageKey {
    fn from(value: MessageId) -> Self {
        Self::Remote(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_ids_are_trimmed_and_reject_blank_input() {
        let id = UserId::parse("  alice ").unwrap();
        assert_eq!(id.as_str(), "alice");
        assert!(UserId::parse("   ").is_err());
        assert!("".parse::<MessageId>().is_err());
    }

    #[test]
    fn local_keys_never_collide_with_remote_lookups() {
        let local = MessageKey::Local(LocalMessageId::new_v7());
        assert!(local.is_local());
        assert_eq!(local.remote(), None);
        assert!(local.to_string().starts_with("local-"));

        let remote = MessageKey::from(MessageId::parse("m-1").unwrap());
        assert_eq!(remote.remote().map(MessageId::as_str), Some("m-1"));
    }
}
