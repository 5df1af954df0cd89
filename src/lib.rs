//! Project transfer server for the show composer authoring tool.
//!
//! Exports a project document and the images it references as a zip, and
//! imports such archives into another installation's asset pool without
//! overwriting unrelated assets. See [`transfer`] for the pipeline and
//! [`api`] for the HTTP surface.

pub mod api;
pub mod companion;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod transfer;

pub use error::{Error, Result};
