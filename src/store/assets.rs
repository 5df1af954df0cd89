//! Filesystem asset pool.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::{validate_filename, AssetPool};
use crate::error::{Error, Result};

/// Asset pool stored as a flat directory of files.
#[derive(Debug, Clone)]
pub struct DirAssetPool {
    root: PathBuf,
}

impl DirAssetPool {
    /// Open the pool at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io("creating asset pool", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetPool for DirAssetPool {
    fn list(&self) -> Result<BTreeSet<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io("listing asset pool", e))?;

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("listing asset pool", e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| Error::io("listing asset pool", e))?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    #[instrument(skip(self, source))]
    fn put(&self, filename: &str, source: &Path) -> Result<()> {
        validate_filename(filename)?;
        let dest = self.root.join(filename);

        // create_new makes the existence check and the reservation one step
        let mut out = match OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(filename.to_string()));
            }
            Err(e) => return Err(Error::io(format!("creating asset {filename}"), e)),
        };

        let copied = fs::File::open(source).and_then(|mut input| io::copy(&mut input, &mut out));
        match copied {
            Ok(bytes) => {
                debug!("Stored {} ({} bytes)", filename, bytes);
                Ok(())
            }
            Err(e) => {
                drop(out);
                let _ = fs::remove_file(&dest);
                Err(Error::io(format!("copying asset {filename}"), e))
            }
        }
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename).map_err(|_| Error::NotFound(filename.to_string()))?;
        let path = self.root.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFound(filename.to_string()))
        }
    }

    fn remove(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        match fs::remove_file(self.root.join(filename)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("removing asset {filename}"), e)),
        }
    }
}
