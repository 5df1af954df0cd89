use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// URL prefix under which pooled assets are referenced from documents.
pub const UPLOADS_PREFIX: &str = "/uploads/";

/// Response to a successful image upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    /// Reference to embed in a document (`/uploads/<file_name>`).
    pub file_path: String,
    pub file_name: String,
}

impl UploadedImage {
    pub fn new(file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            file_path: format!("{UPLOADS_PREFIX}{file_name}"),
            file_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageList {
    pub images: Vec<String>,
}

/// Old filename → new filename for one reconciliation.
pub type RenameMap = BTreeMap<String, String>;

/// Whether a filename has one of the image extensions the pool serves.
pub fn is_image_file(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "jpg" | "jpeg" | "png" | "gif"
    )
}

/// Split a filename into stem and extension (with its dot).
///
/// `photo.large.png` → (`photo.large`, `.png`); `README` → (`README`, ``).
/// A leading dot is part of the stem, so `.hidden` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
