//! Processed configuration view derived from [`RawData`].

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    hash::EntityHash,
    model::{AttributeId, AttributeMeta, Consequence, Decision, DecisionKind, ExplicitDecision},
    raw::{DecisionPatch, RawData, RawDataUpdate},
};

/// One attribute with all of its merged parts and their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: AttributeId,
    pub meta: Option<Arc<AttributeMeta>>,
    pub decision: Option<Arc<Decision>>,
    pub consequence: Option<Arc<Consequence>>,
    hash: EntityHash,
}

fn same_part<T: PartialEq>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
        (None, None) => true,
        _ => false,
    }
}

impl Attribute {
    fn new(
        id: AttributeId,
        meta: Option<Arc<AttributeMeta>>,
        decision: Option<Arc<Decision>>,
        consequence: Option<Arc<Consequence>>,
    ) -> Self {
        let hash = EntityHash::of(
            &id,
            meta.as_deref(),
            decision.as_deref(),
            consequence.as_deref(),
        );
        Self {
            id,
            meta,
            decision,
            consequence,
            hash,
        }
    }

    /// Digest of every observable field.
    #[must_use]
    pub const fn hash(&self) -> EntityHash {
        self.hash
    }

    fn same_parts(&self, raw: &RawData) -> bool {
        same_part(self.meta.as_ref(), raw.meta(&self.id))
            && same_part(self.decision.as_ref(), raw.decision(&self.id))
            && same_part(self.consequence.as_ref(), raw.consequence(&self.id))
    }
}

/// Configuration snapshot as handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    raw: Arc<RawData>,
    attributes: BTreeMap<AttributeId, Arc<Attribute>>,
}

impl Configuration {
    /// Derive every attribute from scratch.
    #[must_use]
    pub fn from_raw(raw: RawData) -> Self {
        Self::default().replace_raw(raw)
    }

    /// Replace the raw data, reusing unchanged attributes of `self`.
    ///
    /// An attribute is rehashed only when one of its parts differs from the
    /// previous snapshot.
    #[must_use]
    pub fn replace_raw(&self, raw: RawData) -> Self {
        let ids = raw.attribute_ids();
        let attributes = ids
            .into_iter()
            .map(|id| {
                let attribute = match self.attributes.get(&id) {
                    Some(prev) if prev.same_parts(&raw) => Arc::clone(prev),
                    _ => Arc::new(Attribute::new(
                        id.clone(),
                        raw.meta(&id).cloned(),
                        raw.decision(&id).cloned(),
                        raw.consequence(&id).cloned(),
                    )),
                };
                (id, attribute)
            })
            .collect();
        Self {
            raw: Arc::new(raw),
            attributes,
        }
    }

    /// Merge a partial update into a new snapshot.
    #[must_use]
    pub fn apply(&self, update: &RawDataUpdate) -> Self {
        if update.is_empty() {
            return self.clone();
        }
        let raw = self.raw.merge(update);
        let mut attributes = self.attributes.clone();
        for id in update.touched() {
            let fresh = match attributes.get(&id) {
                Some(prev) if prev.same_parts(&raw) => continue,
                _ => {
                    let meta = raw.meta(&id).cloned();
                    let decision = raw.decision(&id).cloned();
                    let consequence = raw.consequence(&id).cloned();
                    (meta.is_some() || decision.is_some() || consequence.is_some())
                        .then(|| Arc::new(Attribute::new(id.clone(), meta, decision, consequence)))
                }
            };
            match fresh {
                Some(attribute) => {
                    attributes.insert(id, attribute);
                }
                None => {
                    attributes.remove(&id);
                }
            }
        }
        Self {
            raw: Arc::new(raw),
            attributes,
        }
    }

    /// Apply caller decisions locally, as the engine is expected to.
    #[must_use]
    pub fn with_decisions(&self, decisions: &[ExplicitDecision]) -> Self {
        self.apply(&RawDataUpdate::from_decisions(decisions))
    }

    /// Drop every explicit decision, keeping implicit ones.
    #[must_use]
    pub fn without_explicit_decisions(&self) -> Self {
        let mut update = RawDataUpdate::default();
        for (id, decision) in self.raw.decisions() {
            match decision {
                Decision::Scalar(d) if d.kind == DecisionKind::Explicit => {
                    update
                        .decisions
                        .insert(id.clone(), DecisionPatch::Scalar { decision: None });
                }
                Decision::Scalar(_) => {}
                Decision::Choice { values } => {
                    let cleared: BTreeMap<_, _> = values
                        .iter()
                        .filter(|(_, v)| v.kind == DecisionKind::Explicit)
                        .map(|(value, _)| (value.clone(), None))
                        .collect();
                    if !cleared.is_empty() {
                        update
                            .decisions
                            .insert(id.clone(), DecisionPatch::Choice { values: cleared });
                    }
                }
            }
        }
        self.apply(&update)
    }

    #[must_use]
    pub fn raw(&self) -> &RawData {
        &self.raw
    }

    #[must_use]
    pub fn satisfied(&self) -> bool {
        self.raw.satisfied()
    }

    #[must_use]
    pub fn attribute(&self, id: &AttributeId) -> Option<&Arc<Attribute>> {
        self.attributes.get(id)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Arc<Attribute>> {
        self.attributes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    #[must_use]
    pub fn explicit_decisions(&self) -> Vec<ExplicitDecision> {
        self.raw.explicit_decisions()
    }

    /// Whether a reset would change anything.
    #[must_use]
    pub fn can_reset(&self) -> bool {
        self.raw.decisions().any(|(_, d)| d.has_explicit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeKind, ChoiceValueState, ScalarValue};

    fn base() -> Configuration {
        Configuration::from_raw(
            RawData::default().merge(
                &RawDataUpdate::default()
                    .with_meta("size", AttributeMeta::new("Size", AttributeKind::Numeric))
                    .with_meta("color", AttributeMeta::new("Color", AttributeKind::Choice)),
            ),
        )
    }

    #[test]
    fn untouched_attributes_keep_identity() {
        let before = base();
        let after = before.with_decisions(&[ExplicitDecision::set("size", ScalarValue::Int(4))]);

        let color = AttributeId::new("color");
        assert!(Arc::ptr_eq(
            before.attribute(&color).unwrap(),
            after.attribute(&color).unwrap()
        ));
        let size = AttributeId::new("size");
        assert_ne!(
            before.attribute(&size).unwrap().hash(),
            after.attribute(&size).unwrap().hash()
        );
    }

    #[test]
    fn identical_update_does_not_rehash() {
        let cfg = base().with_decisions(&[ExplicitDecision::set("size", ScalarValue::Int(4))]);
        let again = cfg.with_decisions(&[ExplicitDecision::set("size", ScalarValue::Int(4))]);

        let size = AttributeId::new("size");
        assert!(Arc::ptr_eq(
            cfg.attribute(&size).unwrap(),
            again.attribute(&size).unwrap()
        ));
    }

    #[test]
    fn attribute_without_parts_disappears() {
        let cfg = Configuration::default()
            .with_decisions(&[ExplicitDecision::set("loose", ScalarValue::Bool(true))]);
        assert_eq!(cfg.len(), 1);

        let cleared = cfg.with_decisions(&[ExplicitDecision::clear("loose")]);
        assert!(cleared.is_empty());
    }

    #[test]
    fn replace_raw_matches_incremental_apply() {
        let update = RawDataUpdate::default()
            .with_consequence("size", Consequence::default())
            .with_satisfied(true);
        let incremental = base().apply(&update);
        let rebuilt = base().replace_raw(base().raw().merge(&update));
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn reset_clears_only_explicit_decisions() {
        let cfg = base().with_decisions(&[
            ExplicitDecision::set("size", ScalarValue::Int(4)),
            ExplicitDecision::choose("color", "red", Some(ChoiceValueState::Included)),
        ]);
        assert!(cfg.can_reset());

        let reset = cfg.without_explicit_decisions();
        assert!(!reset.can_reset());
        assert!(reset.explicit_decisions().is_empty());
        assert_eq!(reset.len(), 2);
    }
}
