//! Multipart upload receiver.
//!
//! Streams one named multipart field to a file on disk, enforcing a size
//! limit and a MIME allow-list. Downstream code trusts what this accepts.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::split_extension;

/// Rules for one kind of upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    /// Multipart field carrying the file.
    pub field: &'static str,
    pub max_bytes: u64,
    accepts: fn(&str) -> bool,
    /// Error message when the field is absent.
    missing: &'static str,
    /// Error message when the MIME type is not allowed.
    rejected: &'static str,
}

impl UploadPolicy {
    pub fn accepts(&self, mime: &str) -> bool {
        (self.accepts)(mime)
    }
}

pub const IMAGE_UPLOAD: UploadPolicy = UploadPolicy {
    field: "image",
    max_bytes: 5 * 1024 * 1024,
    accepts: is_image_mime,
    missing: "No file uploaded",
    rejected: "Only image files are allowed!",
};

pub const ARCHIVE_UPLOAD: UploadPolicy = UploadPolicy {
    field: "file",
    max_bytes: 50 * 1024 * 1024,
    accepts: is_zip_mime,
    missing: "No zip file uploaded",
    rejected: "Only zip files are allowed!",
};

/// Request body allowance on top of the file itself for multipart framing.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

fn is_zip_mime(mime: &str) -> bool {
    mime == "application/zip" || mime == "application/x-zip-compressed"
}

/// A file deposited on disk by [`receive`].
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub path: PathBuf,
    pub original_filename: Option<String>,
    pub declared_mime_type: Option<String>,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Missing(&'static str),

    #[error("{0}")]
    Rejected(&'static str),

    #[error("File exceeds the {0} byte limit")]
    TooLarge(u64),

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing(_) | Self::Rejected(_) => StatusCode::BAD_REQUEST,
            // body limit hits surface here as 413
            Self::Multipart(e) => e.status(),
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Write the policy's field from `multipart` into `dir`.
///
/// Other fields are skipped. A partially written file is removed when the
/// upload is rejected. A body cut off by the route's body limit is reported
/// as [`UploadError::TooLarge`].
pub async fn receive(
    multipart: &mut Multipart,
    policy: &UploadPolicy,
    dir: &Path,
) -> Result<ReceivedUpload, UploadError> {
    match receive_field(multipart, policy, dir).await {
        Err(UploadError::Multipart(e)) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::debug!("Upload hit the body limit: {}", e);
            Err(UploadError::TooLarge(policy.max_bytes))
        }
        result => result,
    }
}

async fn receive_field(
    multipart: &mut Multipart,
    policy: &UploadPolicy,
    dir: &Path,
) -> Result<ReceivedUpload, UploadError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(policy.field) {
            continue;
        }

        let declared_mime_type = field.content_type().map(str::to_string);
        if !declared_mime_type.as_deref().is_some_and(|m| policy.accepts(m)) {
            tracing::warn!(
                "Rejected upload with type {:?}",
                declared_mime_type.as_deref().unwrap_or("none")
            );
            return Err(UploadError::Rejected(policy.rejected));
        }
        let original_filename = field.file_name().map(str::to_string);

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.part", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;

        let mut size: u64 = 0;
        let written: Result<(), UploadError> = async {
            while let Some(chunk) = field.chunk().await? {
                size += chunk.len() as u64;
                if size > policy.max_bytes {
                    return Err(UploadError::TooLarge(policy.max_bytes));
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        return Ok(ReceivedUpload {
            path,
            original_filename,
            declared_mime_type,
            size,
        });
    }

    Err(UploadError::Missing(policy.missing))
}

/// Pool name for a freshly uploaded file: `<millis>-<random><.ext>`, keeping
/// the original extension when it is plain alphanumerics.
pub fn pooled_name(original_filename: Option<&str>, now: DateTime<Utc>) -> String {
    let ext = original_filename
        .map(|name| split_extension(name).1)
        .filter(|ext| ext.len() > 1 && ext[1..].chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("");
    let tag = Uuid::new_v4().simple().to_string();
    format!("{}-{}{}", now.timestamp_millis(), &tag[..10], ext.to_ascii_lowercase())
}
