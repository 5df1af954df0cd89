//! Project archive packaging.
//!
//! Layout:
//! - `data.json`: the project document, pretty-printed
//! - `uploads/<filename>`: one entry per referenced asset found in the pool
//!
//! Entries are written in sorted order with the zip default timestamp, so the
//! same document and pool always produce the same bytes.

use std::fs::File;
use std::io::{self, Seek, Write};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::scanner::referenced_filenames;
use crate::error::{Error, Result};
use crate::store::AssetPool;

/// Name of the document member.
pub const DOCUMENT_ENTRY: &str = "data.json";

/// Directory holding asset members.
pub const ASSETS_DIR: &str = "uploads";

/// What went into an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// Asset filenames written under `uploads/`.
    pub included: Vec<String>,
    /// Referenced filenames missing from the pool.
    pub skipped: Vec<String>,
}

/// Write `document` and every referenced asset that `pool` can resolve to
/// `sink` as a zip archive.
///
/// Missing assets are logged and listed in the summary; the reference stays
/// in the archived document as-is.
pub fn write_archive<W: Write + Seek>(
    document: &Value,
    pool: &dyn AssetPool,
    sink: &mut W,
) -> Result<ExportSummary> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| Error::validation(format!("document is not serializable: {e}")))?;

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut zip = ZipWriter::new(sink);
    zip.start_file(DOCUMENT_ENTRY, options).map_err(write_error)?;
    zip.write_all(json.as_bytes())
        .map_err(|e| Error::io("writing archive document", e))?;

    let mut summary = ExportSummary::default();
    for filename in referenced_filenames(document) {
        let path = match pool.resolve(&filename) {
            Ok(path) => path,
            Err(e) if e.is_not_found() => {
                warn!("Referenced asset not found, skipping: {}", filename);
                summary.skipped.push(filename);
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut file =
            File::open(&path).map_err(|e| Error::io(format!("opening asset {filename}"), e))?;
        zip.start_file(format!("{ASSETS_DIR}/{filename}"), options)
            .map_err(write_error)?;
        io::copy(&mut file, &mut zip)
            .map_err(|e| Error::io(format!("writing asset {filename} to archive"), e))?;
        summary.included.push(filename);
    }

    zip.finish().map_err(write_error)?;

    info!(
        "Packaged archive with {} assets ({} skipped)",
        summary.included.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

fn write_error(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::Io(source) => Error::io("writing archive", source),
        other => Error::io("writing archive", io::Error::other(other.to_string())),
    }
}
