//! Optimistic overlay of in-flight mutations.

use std::sync::Arc;

use crate::configuration::Configuration;

/// Pure prediction of a mutation's local effect.
pub type OptimisticEffect = Arc<dyn Fn(&Configuration) -> Configuration + Send + Sync>;

/// Fold `effects` in order over the confirmed snapshot.
///
/// Returns `confirmed` itself when there is nothing to apply, so observers
/// can detect an unchanged view with [`Arc::ptr_eq`].
#[must_use]
pub fn overlay<'a, I>(confirmed: &Arc<Configuration>, effects: I) -> Arc<Configuration>
where
    I: IntoIterator<Item = &'a OptimisticEffect>,
{
    let mut effects = effects.into_iter().peekable();
    if effects.peek().is_none() {
        return Arc::clone(confirmed);
    }
    let view = effects.fold(Configuration::clone(confirmed), |view, effect| effect(&view));
    Arc::new(view)
}
