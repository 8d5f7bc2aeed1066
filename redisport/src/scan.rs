//! Lazy, cancellable key enumeration.
//!
//! Two modes, mirroring the trade-off at the store level: incremental
//! cursor scanning never holds the store for more than one batch
//! round-trip, while a full scan is one blocking enumeration call that
//! is faster on small datasets. Multi-node targets fan out the chosen
//! mode to every node; a pass only completes once every node reports
//! exhaustion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;

use crate::error::Result;
use crate::store::Store;

/// Batch size hint passed to the store on every scan round.
pub const SCAN_BATCH_HINT: usize = 1000;

/// Cooperative cancellation flag, checked before each batch request.
/// In-flight requests are allowed to complete.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Cursor-based, non-blocking enumeration (the default).
    Incremental,
    /// Single blocking list-all call; opt-in trade-off for small datasets.
    Full,
}

enum NodeCursor {
    /// Next scan round starts at this cursor.
    At(u64),
    Exhausted,
}

/// Pull-based source of key batches for one export pass.
pub struct KeySource {
    nodes: Vec<Arc<dyn Store>>,
    pattern: String,
    mode: ScanMode,
    cancel: CancelFlag,
    cursors: Vec<NodeCursor>,
    started: bool,
    batch_hint: usize,
}

impl KeySource {
    pub fn new(store: Arc<dyn Store>, pattern: &str, mode: ScanMode, cancel: CancelFlag) -> Self {
        let nodes = if store.is_multi_node() {
            store.nodes()
        } else {
            vec![store]
        };
        let cursors = nodes.iter().map(|_| NodeCursor::At(0)).collect();
        Self {
            nodes,
            pattern: pattern.to_string(),
            mode,
            cancel,
            cursors,
            started: false,
            batch_hint: SCAN_BATCH_HINT,
        }
    }

    /// Override the per-round batch size hint.
    pub fn with_batch_hint(mut self, hint: usize) -> Self {
        self.batch_hint = hint.max(1);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn exhausted(&self) -> bool {
        self.cursors
            .iter()
            .all(|c| matches!(c, NodeCursor::Exhausted))
    }

    /// Next batch of keys, or `None` once every node is exhausted or
    /// cancellation was requested. A batch is never empty.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        loop {
            if self.cancel.is_cancelled() || (self.started && self.exhausted()) {
                return Ok(None);
            }
            self.started = true;

            let batch = match self.mode {
                ScanMode::Full => self.full_round().await?,
                ScanMode::Incremental => self.scan_round().await?,
            };

            // An incremental round can legally return zero keys while
            // cursors still advance; keep going until keys or exhaustion.
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
            if self.exhausted() {
                return Ok(None);
            }
        }
    }

    /// One blocking list-all call per node, all nodes at once.
    async fn full_round(&mut self) -> Result<Vec<Vec<u8>>> {
        let pattern = self.pattern.clone();
        let futures = self
            .nodes
            .iter()
            .map(|node| {
                let node = node.clone();
                let pattern = pattern.clone();
                async move { node.list_keys(&pattern).await }
            })
            .collect::<Vec<_>>();

        let per_node = try_join_all(futures).await?;
        for cursor in &mut self.cursors {
            *cursor = NodeCursor::Exhausted;
        }
        Ok(per_node.into_iter().flatten().collect())
    }

    /// One scan round: a single cursor step on every non-exhausted
    /// node, issued concurrently and joined before yielding.
    async fn scan_round(&mut self) -> Result<Vec<Vec<u8>>> {
        let pattern = self.pattern.clone();
        let hint = self.batch_hint;

        let mut active = Vec::new();
        for (idx, cursor) in self.cursors.iter().enumerate() {
            if let NodeCursor::At(at) = cursor {
                active.push((idx, *at));
            }
        }

        let futures = active
            .iter()
            .map(|&(idx, at)| {
                let node = self.nodes[idx].clone();
                let pattern = pattern.clone();
                async move {
                    let (next, keys) = node.scan_batch(at, &pattern, hint).await?;
                    Ok::<_, crate::error::Error>((idx, next, keys))
                }
            })
            .collect::<Vec<_>>();

        let mut batch = Vec::new();
        for (idx, next, keys) in try_join_all(futures).await? {
            batch.extend(keys);
            self.cursors[idx] = if next == 0 {
                NodeCursor::Exhausted
            } else {
                NodeCursor::At(next)
            };
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded(count: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for i in 0..count {
            store.set_string(format!("key:{i:03}").as_bytes(), b"v");
        }
        store
    }

    #[tokio::test]
    async fn incremental_visits_every_key() {
        let store = seeded(42);
        let mut source = KeySource::new(store, "*", ScanMode::Incremental, CancelFlag::new())
            .with_batch_hint(10);

        let mut seen = 0;
        while let Some(batch) = source.next_batch().await.unwrap() {
            assert!(!batch.is_empty());
            seen += batch.len();
        }
        assert_eq!(seen, 42);
    }

    #[tokio::test]
    async fn full_mode_yields_one_batch() {
        let store = seeded(42);
        let mut source = KeySource::new(store, "*", ScanMode::Full, CancelFlag::new());

        let batch = source.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 42);
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pattern_filters_keys() {
        let store = MemoryStore::new();
        store.set_string(b"user:1", b"a");
        store.set_string(b"user:2", b"b");
        store.set_string(b"session:1", b"c");

        let mut source = KeySource::new(store, "user:*", ScanMode::Incremental, CancelFlag::new());
        let batch = source.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_stops_before_next_batch() {
        let store = seeded(42);
        let cancel = CancelFlag::new();
        let mut source = KeySource::new(store, "*", ScanMode::Incremental, cancel.clone())
            .with_batch_hint(10);

        let first = source.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 10);

        cancel.request();
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_store_exhausts_immediately() {
        let store = MemoryStore::new();
        let mut source = KeySource::new(store, "*", ScanMode::Incremental, CancelFlag::new());
        assert!(source.next_batch().await.unwrap().is_none());
    }
}
