use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An archive that has been extracted but not yet committed to the pool.
///
/// Sessions are **ephemeral**: the registry hands one out exactly once, to
/// either a confirm or a reject, and the workspace is deleted either way.
/// A session that is never finalized is removed by the TTL sweep.
#[derive(Debug, Clone)]
pub struct StagingSession {
    pub id: Uuid,
    /// Extraction directory owned exclusively by this session.
    pub workspace: PathBuf,
    /// Parsed `data.json`, annotated with the session id.
    pub document: Value,
    pub created_at: DateTime<Utc>,
}

/// Body of the confirm-import request.
///
/// `tempId` is the name the authoring client sends; `sessionId` is accepted
/// as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmImportInput {
    #[serde(alias = "sessionId")]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub confirm: bool,
}

/// Response to a confirm-import request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportOutcome {
    pub fn committed(project_data: Value) -> Self {
        Self {
            success: true,
            project_data: Some(project_data),
            message: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: true,
            project_data: None,
            message: Some("Import cancelled".to_string()),
        }
    }
}
