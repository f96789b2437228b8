//! Edit a hosts file through an in-memory record set that stays in sync
//! with changes made to the file by other programs.

pub mod cli;
pub mod codec;
pub mod config;
pub mod console;
pub mod error;
pub mod gateway;
pub mod record;
pub mod store;
pub mod sync;

pub use codec::{parse_line, LineCodec};
pub use config::SyncConfig;
pub use error::{ConfigError, GatewayError, SyncError};
pub use record::{FieldEdit, HostRecord, RecordId, ValidationError};
pub use store::{InvalidRecord, RecordStore, StoreEvent};
pub use sync::{HostsSync, PersistReport, SyncStatus};
