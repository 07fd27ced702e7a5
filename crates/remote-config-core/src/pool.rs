//! Per-base-URL client cache, injected where it is needed.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

type Factory<C> = Box<dyn Fn(&str) -> C + Send + Sync>;

/// Lazily built clients keyed by base URL.
///
/// Owned by whoever constructs it; nothing here is process-wide.
pub struct ClientPool<C> {
    clients: RwLock<HashMap<String, Arc<C>>>,
    factory: Factory<C>,
}

impl<C> ClientPool<C> {
    /// Create an empty pool building clients with `factory`.
    #[must_use]
    pub fn new(factory: impl Fn(&str) -> C + Send + Sync + 'static) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Get the client for `base_url`, building it on first use.
    pub fn get(&self, base_url: &str) -> Arc<C> {
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(base_url)
        {
            return Arc::clone(client);
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let client = clients.entry(base_url.to_string()).or_insert_with(|| {
            tracing::debug!(base_url, "creating pooled client");
            Arc::new((self.factory)(base_url))
        });
        Arc::clone(client)
    }

    /// Drop the cached client for `base_url`.
    pub fn evict(&self, base_url: &str) -> Option<Arc<C>> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(base_url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
