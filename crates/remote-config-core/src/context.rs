//! Remote context for configuration sessions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes how to reach, and if needed recreate, a remote session.
///
/// The context never changes for the lifetime of a session manager. Session
/// recovery reuses it verbatim together with the confirmed decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteContext {
    /// Base URL of the configuration engine.
    pub base_url: String,

    /// Identifier of the product model the session configures.
    pub model_id: String,

    /// Arbitrary metadata for app-specific needs (locale, tenant, ...).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl RemoteContext {
    /// Create a new context for a model hosted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            metadata: HashMap::new(),
        }
    }
}
