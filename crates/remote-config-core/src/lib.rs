//! Core abstractions for remote configuration sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `RawData` - Mergeable partial attribute data and its merge rules
//! - `Configuration` - Processed, hashed attribute view
//! - `overlay` / `diff` - Optimistic view and change deltas
//! - `SessionService` - Boundary towards the remote engine
//! - `ClientPool` - Injected per-base-URL client cache

pub mod changes;
pub mod configuration;
pub mod context;
pub mod error;
pub mod hash;
pub mod model;
pub mod overlay;
pub mod pool;
pub mod raw;
pub mod session;
pub mod traits;

pub use changes::{ConfigurationChanges, diff};
pub use configuration::{Attribute, Configuration};
pub use context::RemoteContext;
pub use error::{BusinessError, MutationError, SessionError};
pub use hash::EntityHash;
pub use overlay::{OptimisticEffect, overlay};
pub use pool::ClientPool;
pub use raw::{DecisionPatch, RawData, RawDataUpdate};
pub use session::{SessionId, SessionState, StoredSession};
pub use traits::SessionService;
