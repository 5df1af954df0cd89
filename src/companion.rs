//! WebSocket link to the companion process.
//!
//! With `--auto-close` the server tells the companion which directories it
//! serves, then shuts down once that connection goes away.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::config::StaticEndpoint;

/// Companion property listing the served directories.
const SERVED_DIRECTORIES_PROPERTY: &str = "Modules.WebGui.ServedDirectories";

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone)]
pub struct CompanionLink {
    url: String,
    endpoints: Vec<StaticEndpoint>,
}

impl CompanionLink {
    pub fn new(url: impl Into<String>, endpoints: Vec<StaticEndpoint>) -> Self {
        Self {
            url: url.into(),
            endpoints,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, announce the served directories and wait for the
    /// connection to end. A clean close is `Ok`.
    pub async fn run(&self) -> Result<(), CompanionError> {
        let (mut stream, _) = connect_async(self.url.as_str()).await?;
        info!("Connected to companion at {}", self.url);

        let announcement = served_directories_message(&self.endpoints);
        stream.send(Message::text(announcement.to_string())).await?;

        while let Some(message) = stream.next().await {
            if let Message::Close(_) = message? {
                break;
            }
        }
        Ok(())
    }

    /// Resolves when the companion is gone, for use as a shutdown signal.
    pub async fn watch(self) {
        match self.run().await {
            Ok(()) => info!("Lost connection to companion - shutting down"),
            Err(e) => warn!("Companion connection error: {} - shutting down", e),
        }
    }
}

/// `set` message carrying the endpoints as a flat `[name, path, ...]` list.
pub fn served_directories_message(endpoints: &[StaticEndpoint]) -> Value {
    let value: Vec<String> = endpoints
        .iter()
        .flat_map(|e| [e.name.clone(), e.path.display().to_string()])
        .collect();

    json!({
        "topic": 0,
        "type": "set",
        "payload": {
            "property": SERVED_DIRECTORIES_PROPERTY,
            "value": value,
        }
    })
}
