use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::{ResultExt, ensure};

use super::error::{
    EmptyFileSnafu, ReadAttachmentSnafu, TooLargeSnafu, UnsupportedTypeSnafu, ValidationError,
};
use super::message::ImagePayload;

pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;
const IMAGE_MIME_PREFIX: &str = "image/";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Where the attachment bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    Path(PathBuf),
    /// Bytes already in memory, e.g. from a drop target.
    Bytes(Arc<[u8]>),
}

/// A user-selected file, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub name: String,
    pub mime_type: String,
    pub source: AttachmentSource,
}

impl AttachmentFile {
    /// Describes a file on disk, guessing its type from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            name,
            mime_type: guess_mime_type(&path).to_string(),
            source: AttachmentSource::Path(path),
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: AttachmentSource::Bytes(bytes.into()),
        }
    }
}

/// Turns selected files into embeddable image payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentEncoder {
    max_bytes: u64,
}

impl AttachmentEncoder {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Synchronous type check; nothing is read when this fails.
    pub fn validate(&self, file: &AttachmentFile) -> Result<(), ValidationError> {
        let mime_type = file.mime_type.trim().to_ascii_lowercase();
        ensure!(
            mime_type.starts_with(IMAGE_MIME_PREFIX),
            UnsupportedTypeSnafu {
                stage: "validate-attachment-type",
                mime_type: file.mime_type.clone(),
            }
        );
        Ok(())
    }

    /// Reads the file without blocking the runtime and wraps it as an inline image.
    pub async fn encode(&self, file: AttachmentFile) -> Result<ImagePayload, ValidationError> {
        self.validate(&file)?;

        let bytes: Arc<[u8]> = match file.source {
            AttachmentSource::Bytes(bytes) => bytes,
            AttachmentSource::Path(path) => {
                let metadata = tokio::fs::metadata(&path)
                    .await
                    .context(ReadAttachmentSnafu {
                        stage: "stat-attachment",
                        path: path.clone(),
                    })?;
                self.check_size(&file.name, metadata.len())?;

                tokio::fs::read(&path)
                    .await
                    .context(ReadAttachmentSnafu {
                        stage: "read-attachment",
                        path: path.clone(),
                    })?
                    .into()
            }
        };

        self.check_size(&file.name, bytes.len() as u64)?;

        tracing::debug!(
            name = %file.name,
            mime_type = %file.mime_type,
            size_bytes = bytes.len(),
            "encoded attachment"
        );
        Ok(ImagePayload::inline(
            file.mime_type.trim().to_ascii_lowercase(),
            bytes,
        ))
    }

    fn check_size(&self, name: &str, size_bytes: u64) -> Result<(), ValidationError> {
        ensure!(
            size_bytes > 0,
            EmptyFileSnafu {
                stage: "check-attachment-size",
                name: name.to_string(),
            }
        );
        ensure!(
            size_bytes <= self.max_bytes,
            TooLargeSnafu {
                stage: "check-attachment-size",
                name: name.to_string(),
                size_bytes,
                limit_bytes: self.max_bytes,
            }
        );
        Ok(())
    }
}

impl Default for AttachmentEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTACHMENT_BYTES)
    }
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => FALLBACK_MIME_TYPE,
    }
}
