//! redisport: streaming export/import engine for Redis-compatible stores.
//!
//! Exports enumerate a key space lazily (cursor scan by default, one
//! blocking full scan on request), serialize every key into replayable
//! text commands, and append them to a file that a later import replays
//! idempotently. A shared, persisted status slot tracks the single
//! active operation and supports cooperative cancellation.

pub mod error;
pub mod export;
pub mod import;
pub mod pattern;
pub mod quote;
pub mod scan;
pub mod serialize;
pub mod status;
pub mod store;

pub use error::{Error, Result};
pub use export::{ExportOptions, ExportOutcome, ExportSession, EXPORT_FILE_PREFIX};
pub use import::{ImportSession, ImportSummary};
pub use scan::{CancelFlag, KeySource, ScanMode};
pub use serialize::{serialize_key, SerializedKey};
pub use status::{OperationKind, OperationState, OperationStatus, StatusStore};
pub use store::{KeyType, MemoryStore, RedisStore, Store, StreamEntry};
