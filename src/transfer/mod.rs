//! Project export and import.
//!
//! Export: [`write_archive`] packs a document and the assets it references
//! (found by [`extract_asset_references`]) into a zip.
//!
//! Import is two-phase. [`Stager::begin_import`] extracts an uploaded zip
//! into a workspace and registers a [`StagingSession`](crate::models::StagingSession).
//! [`Reconciler::confirm_import`] then copies the staged assets into the
//! pool, renaming on collision, or [`Reconciler::reject_import`] throws the
//! workspace away. Both phases share one [`SessionStore`].

mod archive;
mod reconcile;
mod scanner;
mod sessions;
mod stager;
pub mod walk;

pub use archive::{write_archive, ExportSummary, ASSETS_DIR, DOCUMENT_ENTRY};
pub use reconcile::{disambiguate, Reconciler, RewriteStrategy};
pub use scanner::{asset_filename, extract_asset_references, referenced_filenames};
pub use sessions::{Clock, SessionStore, SystemClock};
pub use stager::Stager;
