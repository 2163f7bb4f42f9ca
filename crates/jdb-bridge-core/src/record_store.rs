//! Broadcast + history store for routed records.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Record, ResultRecord};

/// Default history size limit (4 MB of record text).
pub const DEFAULT_HISTORY_BYTES: usize = 4 * 1024 * 1024;

const LIVE_CAPACITY: usize = 4096;

struct StoredRecord {
    record: Record,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredRecord>,
    total_bytes: usize,
}

/// Record store with broadcast and history support.
///
/// Hosts that attach late get everything still in history, then live
/// records in arrival order.
pub struct RecordStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<Record>,
    limit_bytes: usize,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Create a store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_BYTES)
    }

    /// Create a store keeping at most `limit_bytes` of history.
    #[must_use]
    pub fn with_limit(limit_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(64),
                total_bytes: 0,
            }),
            sender,
            limit_bytes,
        }
    }

    /// Append a record to history and publish it to live subscribers.
    pub fn push(&self, record: Record) {
        let bytes = record.approx_bytes();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.limit_bytes {
            let Some(front) = inner.history.pop_front() else {
                break;
            };
            inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
        }
        inner.history.push_back(StoredRecord {
            record: record.clone(),
            bytes,
        });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);

        // Published under the lock so a snapshot plus subscription never
        // sees a record twice. No subscribers is fine.
        let _ = self.sender.send(record);
    }

    /// Get a receiver for live records.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<Record> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.record.clone())
            .collect()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }

    /// Whether history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream that yields history first, then live records.
    ///
    /// Records a slow consumer misses on the live side are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Record> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<Record> = inner.history.iter().map(|s| s.record.clone()).collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| future::ready(res.ok()));

        hist.chain(live).boxed()
    }

    /// Stream of command completions only.
    #[must_use]
    pub fn results_stream(&self) -> futures::stream::BoxStream<'static, ResultRecord> {
        self.history_plus_stream()
            .filter_map(|record| future::ready(record.into_result()))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{Prompt, StreamRecord};

    fn console(text: &str) -> Record {
        Record::Stream(StreamRecord::console(text))
    }

    #[test]
    fn test_history_is_bounded() {
        let store = RecordStore::with_limit(100);
        for i in 0..20 {
            store.push(console(&format!("line {i}")));
        }
        let history = store.history();
        assert!(history.len() < 20);
        assert_eq!(history.last(), Some(&console("line 19")));
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = RecordStore::new();
        store.push(console("before"));

        let mut stream = store.history_plus_stream();
        store.push(console("after"));

        assert_eq!(stream.next().await, Some(console("before")));
        assert_eq!(stream.next().await, Some(console("after")));
    }

    #[tokio::test]
    async fn test_results_stream_filters() {
        let store = RecordStore::new();
        store.push(console("x = 1"));
        store.push(Record::Result(ResultRecord::from_prompt(Prompt::default())));

        let mut results = store.results_stream();
        let first = results.next().await.unwrap();
        assert_eq!(first.prompt, Prompt::default());
        assert_eq!(store.len(), 2);
    }
}
