//! First phase of an import: extract the uploaded archive into a private
//! workspace and register a staging session for it.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use zip::ZipArchive;

use super::archive::DOCUMENT_ENTRY;
use super::sessions::SessionStore;
use crate::error::{Error, Result};
use crate::models::{StagingSession, SESSION_ANNOTATION};

/// Prefix of workspace directory names under the staging root.
const WORKSPACE_PREFIX: &str = "temp_";

#[derive(Debug, Clone)]
pub struct Stager {
    staging_root: PathBuf,
    sessions: SessionStore,
}

impl Stager {
    pub fn new(staging_root: impl Into<PathBuf>, sessions: SessionStore) -> Result<Self> {
        let staging_root = staging_root.into();
        fs::create_dir_all(&staging_root).map_err(|e| Error::io("creating staging root", e))?;
        Ok(Self {
            staging_root,
            sessions,
        })
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Extract `archive_path` and open a session for it.
    ///
    /// The archive file is consumed: it is deleted whether or not staging
    /// succeeds. On failure the workspace is deleted too.
    #[instrument(skip(self, archive_path))]
    pub fn begin_import(&self, archive_path: &Path) -> Result<StagingSession> {
        let id = Uuid::new_v4();
        let workspace = self.staging_root.join(format!("{WORKSPACE_PREFIX}{id}"));

        let staged = self.stage(id, archive_path, &workspace);
        remove_file_quietly(archive_path);

        let session = match staged {
            Ok(session) => session,
            Err(e) => {
                warn!("Staging import {} failed: {}", id, e);
                remove_workspace(&workspace);
                return Err(e);
            }
        };

        info!("Staged import {}", id);
        self.sessions.insert(session.clone());
        Ok(session)
    }

    fn stage(&self, id: Uuid, archive_path: &Path, workspace: &Path) -> Result<StagingSession> {
        fs::create_dir_all(workspace).map_err(|e| Error::io("creating import workspace", e))?;

        let file = File::open(archive_path).map_err(|e| Error::io("opening uploaded archive", e))?;
        let mut archive = ZipArchive::new(file)?;
        // entries whose paths escape the workspace fail the whole extraction
        archive.extract(workspace)?;

        let mut document = read_document(workspace)?;
        match document.as_object_mut() {
            Some(map) => {
                map.insert(SESSION_ANNOTATION.to_string(), Value::String(id.to_string()));
            }
            None => return Err(Error::format(format!("{DOCUMENT_ENTRY} is not a JSON object"))),
        }

        Ok(StagingSession {
            id,
            workspace: workspace.to_path_buf(),
            document,
            created_at: self.sessions.now(),
        })
    }
}

fn read_document(workspace: &Path) -> Result<Value> {
    let text = match fs::read_to_string(workspace.join(DOCUMENT_ENTRY)) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::format(format!("archive has no {DOCUMENT_ENTRY}")));
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(Error::format(format!("{DOCUMENT_ENTRY} is not UTF-8")));
        }
        Err(e) => return Err(Error::io(format!("reading {DOCUMENT_ENTRY}"), e)),
    };
    serde_json::from_str(&text)
        .map_err(|e| Error::format(format!("{DOCUMENT_ENTRY} is not valid JSON: {e}")))
}

/// Delete a workspace directory, logging instead of failing.
pub(crate) fn remove_workspace(workspace: &Path) {
    match fs::remove_dir_all(workspace) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove import workspace: {}", e),
    }
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove uploaded archive: {}", e),
    }
}
