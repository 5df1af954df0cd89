//! Asset reference discovery.

use std::collections::BTreeSet;

use serde_json::Value;

use super::walk::visit_strings;
use crate::models::UPLOADS_PREFIX;

/// Filename component of an asset reference, if `value` is one.
///
/// A reference is any string containing `/uploads/` whose last path segment
/// is a usable filename, so absolute URLs to the pool qualify too:
/// `/uploads/a.png` and `http://host/uploads/a.png` both name `a.png`.
pub fn asset_filename(value: &str) -> Option<&str> {
    let idx = value.rfind(UPLOADS_PREFIX)?;
    let tail = &value[idx + UPLOADS_PREFIX.len()..];
    let name = tail.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(name)
}

/// Every distinct asset reference string in `document`.
pub fn extract_asset_references(document: &Value) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    visit_strings(document, &mut |s| {
        if asset_filename(s).is_some() {
            refs.insert(s.to_string());
        }
    });
    refs
}

/// Distinct asset filenames referenced by `document`, sorted.
pub fn referenced_filenames(document: &Value) -> BTreeSet<String> {
    extract_asset_references(document)
        .iter()
        .filter_map(|r| asset_filename(r).map(str::to_string))
        .collect()
}
