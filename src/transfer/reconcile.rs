//! Second phase of an import: move staged assets into the pool without
//! clobbering existing files, then fix up the document's references.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::archive::{ASSETS_DIR, DOCUMENT_ENTRY};
use super::scanner::asset_filename;
use super::sessions::SessionStore;
use super::stager::remove_workspace;
use super::walk::rewrite_strings;
use crate::error::{Error, Result};
use crate::models::{is_image_file, split_extension, RenameMap, StagingSession, SESSION_ANNOTATION};
use crate::store::{validate_filename, AssetPool};

/// Attempts at finding a free name before giving up on an asset. Only
/// exceeded if other writers keep taking the names we generate.
const MAX_PLACEMENT_ATTEMPTS: usize = 8;

/// How renamed filenames are propagated into the imported document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// Replace the filename segment of string leaves that are asset
    /// references naming a renamed file. Other strings are untouched.
    #[default]
    Structural,
    /// Replace every occurrence of a renamed filename anywhere in the
    /// serialized document, including inside unrelated strings.
    Substring,
}

impl FromStr for RewriteStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural" => Ok(Self::Structural),
            "substring" => Ok(Self::Substring),
            other => Err(format!("unknown rewrite strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    sessions: SessionStore,
    strategy: RewriteStrategy,
}

impl Reconciler {
    pub fn new(sessions: SessionStore, strategy: RewriteStrategy) -> Self {
        Self { sessions, strategy }
    }

    pub fn strategy(&self) -> RewriteStrategy {
        self.strategy
    }

    /// Commit a staged import into `pool` and return the finalized document.
    ///
    /// The session is consumed whatever the outcome, and its workspace is
    /// deleted. If copying an asset fails, assets already placed by this call
    /// are removed from the pool again before [`Error::CommitFailed`] is
    /// returned.
    #[instrument(skip(self, pool))]
    pub fn confirm_import(&self, session_id: Uuid, pool: &dyn AssetPool) -> Result<Value> {
        let session = self
            .sessions
            .take(session_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        let result = self.commit(&session, pool);
        remove_workspace(&session.workspace);

        match &result {
            Ok(_) => info!("Committed import {}", session_id),
            Err(e) => warn!("Import {} failed: {}", session_id, e),
        }
        result
    }

    /// Discard a staged import. A second reject of the same session is
    /// [`Error::SessionNotFound`].
    #[instrument(skip(self))]
    pub fn reject_import(&self, session_id: Uuid) -> Result<()> {
        let session = self
            .sessions
            .take(session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        remove_workspace(&session.workspace);
        info!("Cancelled import {}", session_id);
        Ok(())
    }

    /// Discard every session older than `ttl`. Returns how many were removed.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let expired = self.sessions.expire(ttl);
        for session in &expired {
            remove_workspace(&session.workspace);
            info!("Expired abandoned import {}", session.id);
        }
        expired.len()
    }

    fn commit(&self, session: &StagingSession, pool: &dyn AssetPool) -> Result<Value> {
        let candidates = candidate_assets(&session.workspace)?;
        let existing = pool.list()?;

        let mut renames = RenameMap::new();
        let mut placed: Vec<String> = Vec::with_capacity(candidates.len());

        for (name, source) in &candidates {
            match place_asset(pool, name, source, &existing) {
                Ok(stored) => {
                    if stored != *name {
                        debug!("Renamed colliding asset {} to {}", name, stored);
                        renames.insert(name.clone(), stored.clone());
                    }
                    placed.push(stored);
                }
                Err(e) => {
                    roll_back(pool, &placed);
                    return Err(Error::CommitFailed {
                        filename: name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        let mut document = session.document.clone();
        if !renames.is_empty() {
            document = apply_renames(document, &renames, self.strategy)?;
        }
        if let Some(map) = document.as_object_mut() {
            map.remove(SESSION_ANNOTATION);
        }

        info!(
            "Placed {} assets ({} renamed)",
            placed.len(),
            renames.len()
        );
        Ok(document)
    }
}

/// Staged asset files as (filename, path), sorted by filename.
///
/// Uses `uploads/` when the archive had one; older archives kept their
/// images next to `data.json` instead.
fn candidate_assets(workspace: &Path) -> Result<Vec<(String, PathBuf)>> {
    let uploads = workspace.join(ASSETS_DIR);
    let (dir, legacy) = if uploads.is_dir() {
        (uploads, false)
    } else {
        (workspace.to_path_buf(), true)
    };

    let entries = fs::read_dir(&dir).map_err(|e| Error::io("listing staged assets", e))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("listing staged assets", e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| Error::io("listing staged assets", e))?
            .is_file();
        if !is_file {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping staged asset with a non UTF-8 name");
            continue;
        };
        if legacy && (name == DOCUMENT_ENTRY || !is_image_file(&name)) {
            continue;
        }
        if validate_filename(&name).is_err() {
            warn!("Skipping staged asset with an unusable name: {:?}", name);
            continue;
        }
        candidates.push((name, entry.path()));
    }

    if legacy && !candidates.is_empty() {
        info!("Found {} images in archive root", candidates.len());
    }
    candidates.sort();
    Ok(candidates)
}

/// Copy one staged asset into the pool and return the name it was stored
/// under. Names taken before the commit started are never attempted; names
/// taken since are detected by the pool's exclusive create.
fn place_asset(
    pool: &dyn AssetPool,
    name: &str,
    source: &Path,
    existing: &BTreeSet<String>,
) -> Result<String> {
    let mut target = if existing.contains(name) {
        disambiguate(name)
    } else {
        name.to_string()
    };

    for _ in 0..MAX_PLACEMENT_ATTEMPTS {
        match pool.put(&target, source) {
            Ok(()) => return Ok(target),
            Err(Error::AlreadyExists(_)) => target = disambiguate(name),
            Err(e) => return Err(e),
        }
    }
    Err(Error::AlreadyExists(name.to_string()))
}

/// `slide.png` → `slide_<8 hex>.png`.
pub fn disambiguate(name: &str) -> String {
    let (stem, ext) = split_extension(name);
    let tag = Uuid::new_v4().simple().to_string();
    format!("{stem}_{}{ext}", &tag[..8])
}

fn roll_back(pool: &dyn AssetPool, placed: &[String]) {
    for name in placed.iter().rev() {
        if let Err(e) = pool.remove(name) {
            warn!("Failed to roll back asset {}: {}", name, e);
        }
    }
}

fn apply_renames(mut document: Value, renames: &RenameMap, strategy: RewriteStrategy) -> Result<Value> {
    match strategy {
        RewriteStrategy::Structural => {
            let count = rewrite_strings(&mut document, &mut |s| {
                let name = asset_filename(s)?;
                let new = renames.get(name)?;
                Some(format!("{}{}", &s[..s.len() - name.len()], new))
            });
            debug!("Rewrote {} asset references", count);
            Ok(document)
        }
        RewriteStrategy::Substring => {
            let text = serde_json::to_string(&document)
                .map_err(|e| Error::validation(format!("document is not serializable: {e}")))?;
            let rewritten = replace_names(&text, renames);
            serde_json::from_str(&rewritten)
                .map_err(|e| Error::format(format!("document invalid after rename: {e}")))
        }
    }
}

/// Single left-to-right pass replacing old names with new ones, longest
/// match first. Replaced text is never rescanned, so a new name containing
/// another old name is left alone.
fn replace_names(text: &str, renames: &RenameMap) -> String {
    let mut pairs: Vec<(&str, &str)> = renames
        .iter()
        .map(|(old, new)| (old.as_str(), new.as_str()))
        .collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for (old, new) in &pairs {
            if !old.is_empty() && rest.starts_with(old) {
                out.push_str(new);
                rest = &rest[old.len()..];
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        let Some(ch) = chars.next() else {
            break;
        };
        out.push(ch);
        rest = chars.as_str();
    }
    out
}
