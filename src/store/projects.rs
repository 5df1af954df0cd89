//! Filesystem project store: one pretty-printed `<name>.json` per project.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{validate_filename, ProjectStore};
use crate::error::{Error, Result};
use crate::models::ProjectSummary;

const EXTENSION: &str = ".json";

#[derive(Debug, Clone)]
pub struct DirProjectStore {
    root: PathBuf,
}

impl DirProjectStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io("creating project store", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_filename(name)?;
        Ok(self.root.join(format!("{name}{EXTENSION}")))
    }
}

impl ProjectStore for DirProjectStore {
    fn save(&self, name: &str, document: &Value) -> Result<()> {
        let path = self.path_for(name)?;
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| Error::validation(format!("project {name} is not serializable: {e}")))?;
        fs::write(&path, json).map_err(|e| Error::io(format!("saving project {name}"), e))?;
        tracing::info!("Saved project {}", name);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Value> {
        let path = self
            .path_for(name)
            .map_err(|_| Error::NotFound(format!("project {name}")))?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("project {name}")));
            }
            Err(e) => return Err(Error::io(format!("loading project {name}"), e)),
        };
        serde_json::from_str(&text)
            .map_err(|e| Error::format(format!("project {name} is not valid JSON: {e}")))
    }

    fn list(&self) -> Result<Vec<ProjectSummary>> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| Error::io("listing projects", e))?;

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("listing projects", e))?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(EXTENSION) else {
                continue;
            };
            let meta = entry
                .metadata()
                .map_err(|e| Error::io(format!("reading metadata of project {stem}"), e))?;
            if !meta.is_file() {
                continue;
            }

            let modified: DateTime<Utc> = meta
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            // Not every filesystem records birth time
            let created: DateTime<Utc> = meta.created().map(DateTime::from).unwrap_or(modified);

            projects.push(ProjectSummary {
                file_path: format!("./projects/{file_name}"),
                project_name: stem.to_string(),
                last_modified: modified,
                created,
            });
        }

        projects.sort_by(|a, b| a.project_name.cmp(&b.project_name));
        Ok(projects)
    }
}
