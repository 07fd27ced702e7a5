//! Raw attribute data and the merge rules for partial updates.
//!
//! Different remote calls return different slices of attribute state: one
//! call reports decisions, another consequences, a third metadata. This
//! module folds those slices into one consistent [`RawData`]:
//!
//! - scalar fields (`satisfied`, `can_contribute`) are replaced wholesale
//! - metadata and consequences are last-write-wins per attribute
//! - decisions are last-write-wins per attribute, except choice decisions,
//!   whose sub-values are unioned by sub-value id
//!
//! An attribute whose decision became empty is dropped from the decision map.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::model::{
    AttributeId, AttributeMeta, ChoiceValueDecision, ChoiceValueId, Consequence, Decision,
    DecisionKind, ExplicitDecision, ScalarDecision,
};

/// Merged attribute data for a whole session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawData {
    satisfied: bool,
    can_contribute: Vec<AttributeId>,
    meta: BTreeMap<AttributeId, Arc<AttributeMeta>>,
    decisions: BTreeMap<AttributeId, Arc<Decision>>,
    consequences: BTreeMap<AttributeId, Arc<Consequence>>,
}

/// Decision part of a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionPatch {
    /// Replace the decision; `None` clears it.
    Scalar { decision: Option<ScalarDecision> },
    /// Union with the current sub-values; `None` removes a sub-value.
    Choice {
        values: BTreeMap<ChoiceValueId, Option<ChoiceValueDecision>>,
    },
}

/// A partial update as returned by a single remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDataUpdate {
    #[serde(default)]
    pub satisfied: Option<bool>,
    #[serde(default)]
    pub can_contribute: Option<Vec<AttributeId>>,
    #[serde(default)]
    pub meta: BTreeMap<AttributeId, AttributeMeta>,
    #[serde(default)]
    pub decisions: BTreeMap<AttributeId, DecisionPatch>,
    #[serde(default)]
    pub consequences: BTreeMap<AttributeId, Consequence>,
}

impl RawDataUpdate {
    #[must_use]
    pub const fn with_satisfied(mut self, satisfied: bool) -> Self {
        self.satisfied = Some(satisfied);
        self
    }

    #[must_use]
    pub fn with_can_contribute(mut self, ids: Vec<AttributeId>) -> Self {
        self.can_contribute = Some(ids);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, id: impl Into<AttributeId>, meta: AttributeMeta) -> Self {
        self.meta.insert(id.into(), meta);
        self
    }

    #[must_use]
    pub fn with_decision(mut self, id: impl Into<AttributeId>, patch: DecisionPatch) -> Self {
        self.decisions.insert(id.into(), patch);
        self
    }

    #[must_use]
    pub fn with_consequence(
        mut self,
        id: impl Into<AttributeId>,
        consequence: Consequence,
    ) -> Self {
        self.consequences.insert(id.into(), consequence);
        self
    }

    /// Build an update that applies caller decisions as explicit decisions.
    ///
    /// Later entries for the same attribute win; choice entries for the same
    /// attribute accumulate.
    #[must_use]
    pub fn from_decisions(decisions: &[ExplicitDecision]) -> Self {
        let mut update = Self::default();
        for decision in decisions {
            match decision {
                ExplicitDecision::Scalar { attribute, value } => {
                    let patch = DecisionPatch::Scalar {
                        decision: value.clone().map(|value| ScalarDecision {
                            value,
                            kind: DecisionKind::Explicit,
                        }),
                    };
                    update.decisions.insert(attribute.clone(), patch);
                }
                ExplicitDecision::Choice {
                    attribute,
                    value,
                    state,
                } => {
                    let sub = state.map(|state| ChoiceValueDecision {
                        state,
                        kind: DecisionKind::Explicit,
                    });
                    let entry = update
                        .decisions
                        .entry(attribute.clone())
                        .or_insert_with(|| DecisionPatch::Choice {
                            values: BTreeMap::new(),
                        });
                    match entry {
                        DecisionPatch::Choice { values } => {
                            values.insert(value.clone(), sub);
                        }
                        DecisionPatch::Scalar { .. } => {
                            *entry = DecisionPatch::Choice {
                                values: BTreeMap::from([(value.clone(), sub)]),
                            };
                        }
                    }
                }
            }
        }
        update
    }

    /// Every attribute id this update touches.
    #[must_use]
    pub fn touched(&self) -> BTreeSet<AttributeId> {
        self.meta
            .keys()
            .chain(self.decisions.keys())
            .chain(self.consequences.keys())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.satisfied.is_none()
            && self.can_contribute.is_none()
            && self.meta.is_empty()
            && self.decisions.is_empty()
            && self.consequences.is_empty()
    }
}

/// Keep the current `Arc` when the merged value is unchanged.
fn replace_if_changed<T: PartialEq>(
    map: &mut BTreeMap<AttributeId, Arc<T>>,
    id: &AttributeId,
    value: T,
) {
    if map.get(id).is_some_and(|current| **current == value) {
        return;
    }
    map.insert(id.clone(), Arc::new(value));
}

fn merge_decision(current: Option<&Decision>, patch: &DecisionPatch) -> Option<Decision> {
    match patch {
        DecisionPatch::Scalar { decision } => decision.clone().map(Decision::Scalar),
        DecisionPatch::Choice { values } => {
            let mut merged = match current {
                Some(Decision::Choice { values }) => values.clone(),
                _ => BTreeMap::new(),
            };
            for (id, value) in values {
                match value {
                    Some(value) => {
                        merged.insert(id.clone(), *value);
                    }
                    None => {
                        merged.remove(id);
                    }
                }
            }
            (!merged.is_empty()).then_some(Decision::Choice { values: merged })
        }
    }
}

impl RawData {
    /// Combine this snapshot with a partial update into a new snapshot.
    #[must_use]
    pub fn merge(&self, update: &RawDataUpdate) -> Self {
        let mut next = self.clone();

        if let Some(satisfied) = update.satisfied {
            next.satisfied = satisfied;
        }
        if let Some(ids) = &update.can_contribute {
            next.can_contribute.clone_from(ids);
        }
        for (id, meta) in &update.meta {
            replace_if_changed(&mut next.meta, id, meta.clone());
        }
        for (id, consequence) in &update.consequences {
            replace_if_changed(&mut next.consequences, id, consequence.clone());
        }
        for (id, patch) in &update.decisions {
            match merge_decision(next.decisions.get(id).map(Arc::as_ref), patch) {
                Some(decision) => replace_if_changed(&mut next.decisions, id, decision),
                None => {
                    next.decisions.remove(id);
                }
            }
        }

        next
    }

    #[must_use]
    pub const fn satisfied(&self) -> bool {
        self.satisfied
    }

    #[must_use]
    pub fn can_contribute(&self) -> &[AttributeId] {
        &self.can_contribute
    }

    #[must_use]
    pub fn meta(&self, id: &AttributeId) -> Option<&Arc<AttributeMeta>> {
        self.meta.get(id)
    }

    #[must_use]
    pub fn decision(&self, id: &AttributeId) -> Option<&Arc<Decision>> {
        self.decisions.get(id)
    }

    #[must_use]
    pub fn consequence(&self, id: &AttributeId) -> Option<&Arc<Consequence>> {
        self.consequences.get(id)
    }

    pub fn decisions(&self) -> impl Iterator<Item = (&AttributeId, &Decision)> {
        self.decisions.iter().map(|(id, d)| (id, d.as_ref()))
    }

    pub fn meta_entries(&self) -> impl Iterator<Item = (&AttributeId, &AttributeMeta)> {
        self.meta.iter().map(|(id, m)| (id, m.as_ref()))
    }

    /// Every attribute id known through any field.
    #[must_use]
    pub fn attribute_ids(&self) -> BTreeSet<AttributeId> {
        self.meta
            .keys()
            .chain(self.decisions.keys())
            .chain(self.consequences.keys())
            .cloned()
            .collect()
    }

    /// Explicit decisions in replayable form, ordered by attribute id.
    #[must_use]
    pub fn explicit_decisions(&self) -> Vec<ExplicitDecision> {
        let mut out = Vec::new();
        for (attribute, decision) in &self.decisions {
            match decision.as_ref() {
                Decision::Scalar(d) if d.kind == DecisionKind::Explicit => {
                    out.push(ExplicitDecision::Scalar {
                        attribute: attribute.clone(),
                        value: Some(d.value.clone()),
                    });
                }
                Decision::Scalar(_) => {}
                Decision::Choice { values } => {
                    out.extend(
                        values
                            .iter()
                            .filter(|(_, v)| v.kind == DecisionKind::Explicit)
                            .map(|(value, v)| ExplicitDecision::Choice {
                                attribute: attribute.clone(),
                                value: value.clone(),
                                state: Some(v.state),
                            }),
                    );
                }
            }
        }
        out
    }
}
