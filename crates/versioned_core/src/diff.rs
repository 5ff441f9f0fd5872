//! Attribute-level change detection and snapshot building.
//!
//! Before a tracked update is written, the pending changes are collected
//! into a [`ChangeSet`]. An empty change set means the update is a no-op and
//! no history is recorded. Otherwise [`ChangeSet::snapshot`] rebuilds the
//! pre-update state that becomes the body of the new version record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Attributes, is_reserved_field};

/// A single attribute that differs between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name
    pub field: String,

    /// Value before the change (None if the field was added)
    pub old: Option<Value>,

    /// Value after the change (None if the field was removed)
    pub new: Option<Value>,
}

/// The set of attribute changes an update is about to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<AttributeChange>,
}

impl ChangeSet {
    /// Compute the changes needed to go from `before` to `after`.
    ///
    /// Reserved fields are ignored. Changed and added fields are listed in
    /// `after` order, followed by removed fields in `before` order.
    pub fn between(before: &Attributes, after: &Attributes) -> Self {
        let mut changes = Vec::new();

        for (field, new_value) in after {
            if is_reserved_field(field) {
                continue;
            }
            match before.get(field) {
                Some(old_value) if old_value == new_value => {}
                old_value => changes.push(AttributeChange {
                    field: field.clone(),
                    old: old_value.cloned(),
                    new: Some(new_value.clone()),
                }),
            }
        }

        for (field, old_value) in before {
            if is_reserved_field(field) || after.contains_key(field) {
                continue;
            }
            changes.push(AttributeChange {
                field: field.clone(),
                old: Some(old_value.clone()),
                new: None,
            });
        }

        Self { changes }
    }

    /// Whether nothing would change.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed attributes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterate over the changes.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeChange> {
        self.changes.iter()
    }

    /// Names of the changed attributes.
    pub fn fields(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.field.as_str()).collect()
    }

    /// Look up the change for one attribute.
    pub fn get(&self, field: &str) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// Build the version snapshot for these changes.
    ///
    /// Starts from `current` (the state with the changes applied) and puts
    /// back the prior value of every changed attribute, so the result is the
    /// state before the update. Reserved fields never appear in it.
    pub fn snapshot(&self, current: &Attributes) -> Attributes {
        let mut doc: Attributes = current
            .iter()
            .filter(|(field, _)| !is_reserved_field(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();

        for change in &self.changes {
            match &change.old {
                Some(old) => {
                    doc.insert(change.field.clone(), old.clone());
                }
                None => {
                    doc.shift_remove(&change.field);
                }
            }
        }

        doc
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a AttributeChange;
    type IntoIter = std::slice::Iter<'a, AttributeChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
