//! Bidirectional synchronization between the record store and the hosts file.

mod coordinator;
pub mod persist;
pub mod state;
pub mod watcher;

pub use coordinator::HostsSync;
pub use persist::{plan_persist, PersistPlan, PersistReport};
pub use state::{SyncState, SyncStatus};
pub use watcher::{ReloadOutcome, ReloadTrigger};
