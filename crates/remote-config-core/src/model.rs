//! Attribute-level domain types.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

/// Identifier of a configurable attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeId(pub String);

impl AttributeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one value of a choice attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceValueId(pub String);

impl ChoiceValueId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ChoiceValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChoiceValueId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of attribute as described by the model metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Boolean,
    Numeric,
    Text,
    /// Multi-valued attribute with a set of sub-values.
    Choice,
}

/// Static metadata about an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMeta {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
}

impl AttributeMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Value of a scalar decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Who made a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Made by the user and replayed on session re-creation.
    Explicit,
    /// Derived by the engine.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarDecision {
    pub value: ScalarValue,
    pub kind: DecisionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceValueState {
    Included,
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceValueDecision {
    pub state: ChoiceValueState,
    pub kind: DecisionKind,
}

/// Decision currently held by an attribute.
///
/// An attribute without a decision has no entry at all; a choice decision
/// always holds at least one sub-value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Scalar(ScalarDecision),
    Choice {
        values: BTreeMap<ChoiceValueId, ChoiceValueDecision>,
    },
}

impl Decision {
    /// Whether any part of this decision was made explicitly.
    #[must_use]
    pub fn has_explicit(&self) -> bool {
        match self {
            Self::Scalar(d) => d.kind == DecisionKind::Explicit,
            Self::Choice { values } => values.values().any(|v| v.kind == DecisionKind::Explicit),
        }
    }
}

/// Engine-computed consequence for an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Consequence {
    pub satisfied: bool,
    #[serde(default)]
    pub possible_values: BTreeSet<ChoiceValueId>,
}

/// A decision as submitted by a caller.
///
/// `None` values clear the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplicitDecision {
    Scalar {
        attribute: AttributeId,
        value: Option<ScalarValue>,
    },
    Choice {
        attribute: AttributeId,
        value: ChoiceValueId,
        state: Option<ChoiceValueState>,
    },
}

impl ExplicitDecision {
    #[must_use]
    pub fn set(attribute: impl Into<AttributeId>, value: ScalarValue) -> Self {
        Self::Scalar {
            attribute: attribute.into(),
            value: Some(value),
        }
    }

    #[must_use]
    pub fn clear(attribute: impl Into<AttributeId>) -> Self {
        Self::Scalar {
            attribute: attribute.into(),
            value: None,
        }
    }

    #[must_use]
    pub fn choose(
        attribute: impl Into<AttributeId>,
        value: impl Into<ChoiceValueId>,
        state: Option<ChoiceValueState>,
    ) -> Self {
        Self::Choice {
            attribute: attribute.into(),
            value: value.into(),
            state,
        }
    }

    #[must_use]
    pub const fn attribute(&self) -> &AttributeId {
        match self {
            Self::Scalar { attribute, .. } | Self::Choice { attribute, .. } => attribute,
        }
    }
}

/// "Why does this attribute hold its current state?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainQuestion {
    pub attribute: AttributeId,
}

/// Explicit decisions that cause an attribute's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub attribute: AttributeId,
    pub causes: Vec<ExplicitDecision>,
}
