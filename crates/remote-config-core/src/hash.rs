//! Content digest of an attribute's observable state.

use std::fmt;

use serde::Serialize;

use crate::model::{AttributeId, AttributeMeta, Consequence, Decision};

/// Stable digest of an attribute; used for diffing only, never for identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHash([u8; 32]);

#[derive(Debug, Serialize)]
struct HashedParts<'a> {
    id: &'a AttributeId,
    meta: Option<&'a AttributeMeta>,
    decision: Option<&'a Decision>,
    consequence: Option<&'a Consequence>,
}

impl EntityHash {
    /// Digest the canonical JSON encoding of an attribute's parts.
    ///
    /// All maps in the model are ordered, so equal parts always encode to
    /// equal bytes.
    #[must_use]
    pub fn of(
        id: &AttributeId,
        meta: Option<&AttributeMeta>,
        decision: Option<&Decision>,
        consequence: Option<&Consequence>,
    ) -> Self {
        let parts = HashedParts {
            id,
            meta,
            decision,
            consequence,
        };
        let encoded = serde_json::to_vec(&parts).unwrap_or_else(|e| {
            tracing::warn!(attribute = %id, "failed to encode attribute for hashing: {e}");
            format!("{parts:?}").into_bytes()
        });
        Self(*blake3::hash(&encoded).as_bytes())
    }
}

impl fmt::Debug for EntityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHash(")?;
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}
