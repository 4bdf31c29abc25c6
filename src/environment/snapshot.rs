//! Snapshots and Diffing
//!
//! `flatten` collapses a source stack into one key/value view and `diff`
//! compares two such views key by key.

use super::sources::PropertySources;
use super::types::{PropertyValue, SharedSource};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Effective key/value view of a source stack
pub type FlatView = BTreeMap<String, PropertyValue>;

/// Flatten `sources`, skipping any layer named in `excluded`
///
/// Layers are applied from lowest to highest priority so that the highest
/// priority definition of a key wins. Opaque layers contribute nothing, and a
/// layer that fails to enumerate its keys is treated the same way.
pub fn flatten(sources: &PropertySources, excluded: &HashSet<String>) -> FlatView {
    let mut result = FlatView::new();
    for source in sources.iter().rev() {
        if !excluded.contains(source.name()) {
            collect(source, &mut result);
        }
    }
    result
}

fn collect(source: &SharedSource, result: &mut FlatView) {
    if let Some(nested) = source.nested() {
        for child in nested.iter().rev() {
            collect(child, result);
        }
        return;
    }

    match source.property_names() {
        Some(Ok(keys)) => {
            for key in keys {
                let value = source.get_property(&key).unwrap_or(PropertyValue::Null);
                result.insert(key, value);
            }
        }
        Some(Err(e)) => {
            debug!(source = %source.name(), error = %e, "Skipping source that failed to enumerate");
        }
        None => {}
    }
}

/// How a key changed between two views
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PropertyChange {
    Updated(PropertyValue),
    Removed,
}

/// Keys whose effective value differs between two views
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    changes: BTreeMap<String, PropertyChange>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyChange> {
        self.changes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyChange)> {
        self.changes.iter()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.changes.keys().cloned().collect()
    }
}

/// Compare `before` with `after`
///
/// A key is reported when it exists in only one view or when its values are
/// not structurally equal.
pub fn diff(before: &FlatView, after: &FlatView) -> ChangeSet {
    let mut changes = BTreeMap::new();
    for (key, old) in before {
        match after.get(key) {
            None => {
                changes.insert(key.clone(), PropertyChange::Removed);
            }
            Some(new) if new != old => {
                changes.insert(key.clone(), PropertyChange::Updated(new.clone()));
            }
            Some(_) => {}
        }
    }
    for (key, new) in after {
        if !before.contains_key(key) {
            changes.insert(key.clone(), PropertyChange::Updated(new.clone()));
        }
    }
    ChangeSet { changes }
}
