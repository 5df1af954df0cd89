//! Server configuration: command-line flags plus environment tuning.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use crate::transfer::RewriteStrategy;

/// Endpoint name reserved for the directory listing page.
pub const RESERVED_ENDPOINT: &str = "endpoints";

/// Flags for `serve`, also accepted without the subcommand.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Port for the HTTP server
    #[arg(short = 'p', long, default_value_t = 4680)]
    pub http_port: u16,

    /// Address of the companion WebSocket server handed to clients
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    pub ws_address: String,

    /// Port of the companion WebSocket server handed to clients
    #[arg(short = 'w', long, default_value_t = 4682)]
    pub ws_port: u16,

    /// Directories to serve, as a JSON list: '["endpoint1", "path1", "endpoint2", "path2"]'
    #[arg(short = 'd', long, default_value = "[]")]
    pub directories: String,

    /// The companion process runs on 127.0.0.1
    #[arg(short = 'l', long)]
    pub local: bool,

    /// Endpoint that receives redirects from `/`
    #[arg(short = 'r', long, default_value = RESERVED_ENDPOINT)]
    pub redirect: String,

    /// Connect to the companion WebSocket server and shut down when the connection is lost
    #[arg(short = 'c', long)]
    pub auto_close: bool,

    /// Root for uploads, projects and staging (defaults to the platform data dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// A directory served as static files under `/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    pub name: String,
    pub path: PathBuf,
}

/// Import tuning loaded from environment variables.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Age after which an unfinished import is discarded
    /// (from SHOWCOMPOSER_SESSION_TTL_SECS).
    pub session_ttl: std::time::Duration,
    /// How often abandoned imports are swept (from SHOWCOMPOSER_SWEEP_INTERVAL_SECS).
    pub sweep_interval: std::time::Duration,
    /// Rename propagation (from SHOWCOMPOSER_REWRITE: `structural` or `substring`).
    pub rewrite: RewriteStrategy,
}

impl TransferConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let session_ttl = env_secs("SHOWCOMPOSER_SESSION_TTL_SECS").unwrap_or(defaults.session_ttl);
        let sweep_interval =
            env_secs("SHOWCOMPOSER_SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval);

        let rewrite = match std::env::var("SHOWCOMPOSER_REWRITE") {
            Ok(value) => value.parse().unwrap_or_else(|e: String| {
                tracing::warn!("{}, using structural", e);
                RewriteStrategy::Structural
            }),
            Err(_) => defaults.rewrite,
        };

        Self {
            session_ttl,
            sweep_interval,
            rewrite,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            session_ttl: std::time::Duration::from_secs(60 * 60),
            sweep_interval: std::time::Duration::from_secs(5 * 60),
            rewrite: RewriteStrategy::Structural,
        }
    }
}

fn env_secs(key: &str) -> Option<std::time::Duration> {
    let value = std::env::var(key).ok()?;
    let secs = parse_secs(&value);
    if secs.is_none() {
        tracing::warn!("Ignoring {}={:?}: expected a positive number of seconds", key, value);
    }
    secs
}

/// Positive whole seconds. Zero is rejected.
fn parse_secs(value: &str) -> Option<std::time::Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|&secs| secs > 0)
        .map(std::time::Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub ws_address: String,
    pub ws_port: u16,
    pub local: bool,
    pub redirect: String,
    pub auto_close: bool,
    pub endpoints: Vec<StaticEndpoint>,
    pub data_dir: PathBuf,
    /// Allowed CORS origins (from SHOWCOMPOSER_CORS_ORIGINS, comma-separated).
    /// `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    pub transfer: TransferConfig,
}

impl Config {
    pub fn from_args(args: ServeArgs) -> Result<Self> {
        let endpoints = parse_endpoints(&args.directories)?;

        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => directories::ProjectDirs::from("", "", "showcomposer")
                .context("Could not determine data directory")?
                .data_dir()
                .to_path_buf(),
        };

        let cors_origins = std::env::var("SHOWCOMPOSER_CORS_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect());

        Ok(Self {
            http_port: args.http_port,
            ws_address: args.ws_address,
            ws_port: args.ws_port,
            local: args.local,
            redirect: args.redirect,
            auto_close: args.auto_close,
            endpoints,
            data_dir,
            cors_origins,
            transfer: TransferConfig::from_env(),
        })
    }

    /// Defaults rooted at `data_dir`, with no static endpoints.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_port: 4680,
            ws_address: "127.0.0.1".to_string(),
            ws_port: 4682,
            local: false,
            redirect: RESERVED_ENDPOINT.to_string(),
            auto_close: false,
            endpoints: Vec::new(),
            data_dir: data_dir.into(),
            cors_origins: None,
            transfer: TransferConfig::default(),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    /// Where multipart uploads land before they are consumed.
    pub fn incoming_dir(&self) -> PathBuf {
        self.data_dir.join("incoming")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// WebSocket URL of the companion process watched with `--auto-close`.
    /// A local companion is always reached over loopback.
    pub fn companion_url(&self) -> String {
        let address = if self.local {
            "127.0.0.1"
        } else {
            self.ws_address.as_str()
        };
        format!("ws://{}:{}", address, self.ws_port)
    }
}

/// Parse `["name1", "path1", "name2", "path2", ...]` into endpoints.
///
/// Pairs with a non-string path or the reserved name are logged and
/// dropped; a trailing unpaired element is ignored.
pub fn parse_endpoints(json: &str) -> Result<Vec<StaticEndpoint>> {
    let list: Vec<Value> = serde_json::from_str(json)
        .with_context(|| format!("Failed to parse endpoints: {json}"))?;

    let mut endpoints: Vec<StaticEndpoint> = Vec::new();
    for pair in list.chunks_exact(2) {
        let name = match &pair[0] {
            Value::String(s) => s.trim_matches('/').to_string(),
            other => other.to_string(),
        };
        let Some(path) = pair[1].as_str() else {
            tracing::error!("Expected {} to be a string", pair[1]);
            continue;
        };
        if name.is_empty() {
            tracing::error!("Endpoint for {} has no name", path);
            continue;
        }
        if name == RESERVED_ENDPOINT {
            tracing::error!(
                "\"{}\" is a reserved endpoint to list available endpoints",
                RESERVED_ENDPOINT
            );
            continue;
        }
        // later pairs override earlier ones with the same name
        endpoints.retain(|e| e.name != name);
        endpoints.push(StaticEndpoint {
            name,
            path: PathBuf::from(path),
        });
    }
    Ok(endpoints)
}
