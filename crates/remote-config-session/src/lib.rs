//! Work scheduling and session recovery for remote configuration sessions.
//!
//! Provides:
//! - `Scheduler` - Queue, run and recover work against one remote session
//! - `SessionManager` - Caller-facing façade over the scheduler
//! - `ChangeNotifier` - Change and reset listeners over confirmed snapshots
//! - Service implementations (memory)

pub mod completion;
pub mod config;
pub mod manager;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod transitions;
pub mod work;

pub use completion::{Completion, Promise};
pub use config::SchedulerConfig;
pub use manager::SessionManager;
pub use notify::{ChangeNotifier, ListenerId};
pub use scheduler::{Phase, Scheduler};
pub use transitions::{Resolution, Transition, TransitionStore};
pub use work::{QueueInfo, WorkId, WorkItem};
