//! Store access boundary.
//!
//! The engine never talks to a concrete client directly; everything goes
//! through the [`Store`] trait so that exports and imports run the same
//! way against a live Redis node, a cluster of nodes, or the in-memory
//! store the test suite uses.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Store-reported value type of a key.
///
/// Closed set with an explicit escape hatch: module types the engine
/// cannot reconstruct surface as `Unknown` and are serialized as typed
/// placeholder markers, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    String,
    Hash,
    List,
    Set,
    SortedSet,
    Stream,
    Unknown(String),
}

impl KeyType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "string" => KeyType::String,
            "hash" => KeyType::Hash,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "zset" => KeyType::SortedSet,
            "stream" => KeyType::Stream,
            other => KeyType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyType::String => "string",
            KeyType::Hash => "hash",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::SortedSet => "zset",
            KeyType::Stream => "stream",
            KeyType::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stream entry: id plus field/value pairs in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Read/replay interface over one logical store target.
///
/// Keys and values are byte strings throughout; the store may hold
/// binary data that is not valid UTF-8.
///
/// For multi-node targets the top-level handle must resolve reads and
/// replays for a key owned by any node (slot routing); the per-node
/// handles returned by [`Store::nodes`] only have to answer
/// enumeration for their own key space.
#[async_trait]
pub trait Store: Send + Sync {
    /// One round of incremental, non-blocking enumeration. Cursor `0`
    /// starts a pass; a returned cursor of `0` means the pass finished.
    /// `count` is a batch size hint, not a guarantee.
    async fn scan_batch(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)>;

    /// Blocking full enumeration of every key matching `pattern`.
    /// Faster on small datasets, blocks the store on large ones.
    async fn list_keys(&self, pattern: &str) -> Result<Vec<Vec<u8>>>;

    async fn key_type(&self, key: &[u8]) -> Result<KeyType>;

    async fn get_string(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn hash_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Full list contents in list order (index 0 first).
    async fn list_range(&self, key: &[u8]) -> Result<Vec<Vec<u8>>>;

    async fn set_members(&self, key: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Members with scores, ascending by score.
    async fn sorted_set_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, f64)>>;

    async fn stream_entries(&self, key: &[u8]) -> Result<Vec<StreamEntry>>;

    /// Remaining time-to-live, `None` when the key does not expire.
    async fn ttl_remaining(&self, key: &[u8]) -> Result<Option<Duration>>;

    /// Replay one command (first argument is the command name).
    async fn issue_command(&self, args: &[Vec<u8>]) -> Result<()>;

    /// Rough total key count, used only as a progress estimate.
    async fn total_keys(&self) -> Result<u64>;

    /// Whether this handle fronts a multi-node topology. When true,
    /// [`Store::nodes`] returns one handle per node and enumeration
    /// must fan out to all of them.
    fn is_multi_node(&self) -> bool {
        false
    }

    /// Per-node handles for multi-node targets; empty for single nodes.
    fn nodes(&self) -> Vec<Arc<dyn Store>> {
        Vec::new()
    }

    /// Target endpoint, used for deterministic export file names.
    fn endpoint(&self) -> (String, u16);
}
