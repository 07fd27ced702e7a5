//! Externally observable deltas between confirmed snapshots.

use std::sync::Arc;

use crate::{
    configuration::{Attribute, Configuration},
    model::AttributeId,
};

/// Delta between two configuration snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationChanges {
    pub satisfaction_changed: bool,
    pub added: Vec<Arc<Attribute>>,
    pub changed: Vec<Arc<Attribute>>,
    pub removed: Vec<AttributeId>,
}

impl ConfigurationChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.satisfaction_changed
            && self.added.is_empty()
            && self.changed.is_empty()
            && self.removed.is_empty()
    }
}

/// Compute the delta from `previous` to `current`.
///
/// Attributes are matched by id and compared by hash only. With no previous
/// snapshot every attribute is added and satisfaction counts as changed when
/// the current snapshot is satisfied.
#[must_use]
pub fn diff(previous: Option<&Configuration>, current: &Configuration) -> ConfigurationChanges {
    let Some(previous) = previous else {
        return ConfigurationChanges {
            satisfaction_changed: current.satisfied(),
            added: current.attributes().cloned().collect(),
            ..ConfigurationChanges::default()
        };
    };

    let mut changes = ConfigurationChanges {
        satisfaction_changed: previous.satisfied() != current.satisfied(),
        ..ConfigurationChanges::default()
    };
    for attribute in current.attributes() {
        match previous.attribute(&attribute.id) {
            None => changes.added.push(Arc::clone(attribute)),
            Some(prev) if prev.hash() != attribute.hash() => {
                changes.changed.push(Arc::clone(attribute));
            }
            Some(_) => {}
        }
    }
    changes.removed = previous
        .attributes()
        .filter(|a| current.attribute(&a.id).is_none())
        .map(|a| a.id.clone())
        .collect();
    changes
}
