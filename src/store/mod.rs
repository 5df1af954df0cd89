//! Directory-backed stores the transfer pipeline reads from and writes to.
//!
//! The pipeline only depends on the [`AssetPool`] and [`ProjectStore`]
//! traits; [`DirAssetPool`] and [`DirProjectStore`] are the filesystem
//! implementations the server runs with.

mod assets;
mod projects;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::ProjectSummary;

pub use assets::DirAssetPool;
pub use projects::DirProjectStore;

/// Store of uniquely-named asset files shared by every project.
pub trait AssetPool: Send + Sync {
    /// Names of every asset currently in the pool.
    fn list(&self) -> Result<BTreeSet<String>>;

    /// Copy `source` into the pool as `filename`.
    ///
    /// Creation is exclusive: if `filename` already exists the call fails
    /// with [`Error::AlreadyExists`] and the existing file is untouched.
    fn put(&self, filename: &str, source: &Path) -> Result<()>;

    /// Location of an asset, or [`Error::NotFound`].
    fn resolve(&self, filename: &str) -> Result<PathBuf>;

    /// Delete an asset. Missing assets are not an error.
    fn remove(&self, filename: &str) -> Result<()>;
}

/// Store of named project documents.
pub trait ProjectStore: Send + Sync {
    /// Persist `document` under `name`, replacing any previous version.
    fn save(&self, name: &str, document: &Value) -> Result<()>;

    fn load(&self, name: &str) -> Result<Value>;

    fn list(&self) -> Result<Vec<ProjectSummary>>;
}

/// Reject names that could escape a store directory or hide from listings.
pub(crate) fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::validation(format!("invalid file name: {name:?}")));
    }
    Ok(())
}
