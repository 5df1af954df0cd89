use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Fallback used when the project name is blank after sanitizing.
pub const DEFAULT_PROJECT_NAME: &str = "project";

/// Key the import flow adds to a staged document so the client can refer
/// back to its session. Never persisted.
pub const SESSION_ANNOTATION: &str = "_tempImportId";

/// Read `settingsStore.projectName` from a project document.
pub fn project_name(document: &Value) -> Result<&str> {
    document
        .get("settingsStore")
        .and_then(|settings| settings.get("projectName"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("settingsStore.projectName is required"))
}

/// Project name with spaces replaced by underscores, suitable as a file stem.
///
/// Path separators and parent references are rejected rather than rewritten
/// so a document can never address a file outside its store.
pub fn file_stem(document: &Value) -> Result<String> {
    let name = project_name(document)?.trim().replace(' ', "_");
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::validation(format!("invalid project name: {name}")));
    }
    if name.is_empty() {
        return Ok(DEFAULT_PROJECT_NAME.to_string());
    }
    Ok(name)
}

/// Download name for an exported archive: `<Project_Name>-<millis>.zip`.
pub fn archive_file_name(document: &Value, now: DateTime<Utc>) -> Result<String> {
    Ok(format!("{}-{}.zip", file_stem(document)?, now.timestamp_millis()))
}

/// Metadata for a stored project, as returned by the project listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    /// Relative URL of the stored document (`./projects/<file>`).
    pub file_path: String,
    pub project_name: String,
    pub last_modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
}
