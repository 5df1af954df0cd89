//! Domain models for the show composer transfer server.
//!
//! # Core Concepts
//!
//! ## Persistent Entities
//!
//! - Project documents: free-form JSON with a required
//!   `settingsStore.projectName`. Kept as [`serde_json::Value`]; the helpers
//!   in this module read the few fields the server cares about.
//! - Assets: image files in the pool, referenced from documents as
//!   `/uploads/<filename>`.
//!
//! ## Ephemeral Entities
//!
//! - [`StagingSession`]: an extracted archive waiting to be confirmed or
//!   rejected.
//! - [`RenameMap`]: collision renames computed during one confirm.

mod asset;
mod project;
mod session;

pub use asset::*;
pub use project::*;
pub use session::*;
